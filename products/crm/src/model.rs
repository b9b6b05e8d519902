//! Domain records shared by every store implementation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Records that are soft-deleted by stamping `deleted_at`.
pub trait Tombstoned {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_archived(&self) -> bool {
        self.deleted_at().is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Delivery {
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Deal {
    pub id: Uuid,
    pub title: String,
    pub stage: String,
    pub contact_ids: Vec<Uuid>,
    pub tag_ids: Vec<Uuid>,
    pub assigned_user_id: Option<Uuid>,
    pub delivery: Delivery,
    /// Manual position within the stage column.
    pub sort_index: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tombstoned for Deal {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Partial set of deal changes. `None` leaves a field untouched.
///
/// `assigned_user_id` is tri-state: `Some(None)` asks to clear the assignee,
/// which the automation engine rejects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DealPatch {
    pub title: Option<String>,
    pub stage: Option<String>,
    pub contact_ids: Option<Vec<Uuid>>,
    pub tag_ids: Option<Vec<Uuid>>,
    pub assigned_user_id: Option<Option<Uuid>>,
    pub delivery: Option<Delivery>,
    pub sort_index: Option<f64>,
}

impl DealPatch {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::default()
        }
    }

    pub fn tags(tag_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            tag_ids: Some(tag_ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_tags(mut self, tag_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.tag_ids = Some(tag_ids.into_iter().collect());
        self
    }

    pub fn with_assignee(mut self, user_id: Uuid) -> Self {
        self.assigned_user_id = Some(Some(user_id));
        self
    }

    pub fn clearing_assignee(mut self) -> Self {
        self.assigned_user_id = Some(None);
        self
    }

    pub fn clears_assignee(&self) -> bool {
        matches!(self.assigned_user_id, Some(None))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Writes every present field onto `deal`.
    pub fn apply_to(&self, deal: &mut Deal, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            deal.title = title.clone();
        }
        if let Some(stage) = &self.stage {
            deal.stage = stage.clone();
        }
        if let Some(contact_ids) = &self.contact_ids {
            deal.contact_ids = contact_ids.clone();
        }
        if let Some(tag_ids) = &self.tag_ids {
            deal.tag_ids = tag_ids.clone();
        }
        if let Some(assigned) = self.assigned_user_id {
            deal.assigned_user_id = assigned;
        }
        if let Some(delivery) = &self.delivery {
            deal.delivery = delivery.clone();
        }
        if let Some(sort_index) = self.sort_index {
            deal.sort_index = sort_index;
        }
        deal.updated_at = now;
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct NewDeal {
    pub title: String,
    /// Defaults to the first pipeline stage.
    pub stage: Option<String>,
    pub contact_ids: Vec<Uuid>,
    pub assigned_user_id: Option<Uuid>,
    pub delivery: Delivery,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub sort_index: f64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub completed: bool,
    pub due_date: Option<NaiveDate>,
    pub deal_id: Option<Uuid>,
    pub responsible_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tombstoned for Task {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub deal_id: Option<Uuid>,
    pub responsible_user_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

/// Partial task update; `Some(None)` clears an optional field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<NaiveDate>>,
    pub deal_id: Option<Option<Uuid>>,
    pub responsible_user_id: Option<Option<Uuid>>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Contact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub tag_ids: Vec<Uuid>,
    pub folder_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref().map(str::trim) {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name.trim(), last),
            _ => self.first_name.trim().to_string(),
        }
    }
}

impl Tombstoned for Contact {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct NewContact {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub tag_ids: Vec<Uuid>,
    pub folder_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PipelineStage {
    pub key: String,
    pub display_name: String,
    pub sort_order: i16,
}

/// One `field operator value` condition of a dynamic list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FilterRule {
    pub field: String,
    pub operator: String,
    pub value: String,
}

impl FilterRule {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DynamicList {
    pub id: Uuid,
    pub name: String,
    pub tag_ids: Vec<Uuid>,
    pub rules: Vec<FilterRule>,
}
