use async_graphql::{ID, InputObject, MaybeUndefined, SimpleObject};
use chrono::{DateTime, NaiveDate, Utc};
use products_crm::model::{Contact, Deal, PipelineStage, Tag, Task};
use uuid::Uuid;

pub(crate) fn id(value: Uuid) -> ID {
    ID::from(value.to_string())
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Deal")]
pub struct DealNode {
    pub id: ID,
    pub title: String,
    pub stage: String,
    #[graphql(name = "contactIds")]
    pub contact_ids: Vec<ID>,
    #[graphql(name = "tagIds")]
    pub tag_ids: Vec<ID>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: Option<ID>,
    #[graphql(name = "deliveryDate")]
    pub delivery_date: Option<NaiveDate>,
    #[graphql(name = "deliveryNotes")]
    pub delivery_notes: Option<String>,
    #[graphql(name = "sortIndex")]
    pub sort_index: f64,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[graphql(name = "deletedAt")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Deal> for DealNode {
    fn from(deal: Deal) -> Self {
        Self {
            id: id(deal.id),
            title: deal.title,
            stage: deal.stage,
            contact_ids: deal.contact_ids.into_iter().map(id).collect(),
            tag_ids: deal.tag_ids.into_iter().map(id).collect(),
            assigned_user_id: deal.assigned_user_id.map(id),
            delivery_date: deal.delivery.date,
            delivery_notes: deal.delivery.notes,
            sort_index: deal.sort_index,
            created_at: deal.created_at,
            updated_at: deal.updated_at,
            deleted_at: deal.deleted_at,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Task")]
pub struct TaskNode {
    pub id: ID,
    pub title: String,
    pub completed: bool,
    #[graphql(name = "dueDate")]
    pub due_date: Option<NaiveDate>,
    #[graphql(name = "dealId")]
    pub deal_id: Option<ID>,
    #[graphql(name = "responsibleUserId")]
    pub responsible_user_id: ID,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<Task> for TaskNode {
    fn from(task: Task) -> Self {
        Self {
            id: id(task.id),
            title: task.title,
            completed: task.completed,
            due_date: task.due_date,
            deal_id: task.deal_id.map(id),
            responsible_user_id: id(task.responsible_user_id),
            created_at: task.created_at,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Tag")]
pub struct TagNode {
    pub id: ID,
    pub name: String,
    pub color: String,
    #[graphql(name = "sortIndex")]
    pub sort_index: f64,
}

impl From<Tag> for TagNode {
    fn from(tag: Tag) -> Self {
        Self {
            id: id(tag.id),
            name: tag.name,
            color: tag.color,
            sort_index: tag.sort_index,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Stage")]
pub struct StageNode {
    pub key: String,
    #[graphql(name = "displayName")]
    pub display_name: String,
    #[graphql(name = "sortOrder")]
    pub sort_order: i32,
}

impl From<PipelineStage> for StageNode {
    fn from(stage: PipelineStage) -> Self {
        Self {
            key: stage.key,
            display_name: stage.display_name,
            sort_order: i32::from(stage.sort_order),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Contact")]
pub struct ContactNode {
    pub id: ID,
    #[graphql(name = "firstName")]
    pub first_name: String,
    #[graphql(name = "lastName")]
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    #[graphql(name = "tagIds")]
    pub tag_ids: Vec<ID>,
}

impl From<Contact> for ContactNode {
    fn from(contact: Contact) -> Self {
        Self {
            id: id(contact.id),
            first_name: contact.first_name,
            last_name: contact.last_name,
            email: contact.email,
            company: contact.company,
            tag_ids: contact.tag_ids.into_iter().map(id).collect(),
        }
    }
}

#[derive(Clone, Debug, InputObject)]
pub struct NewDealInput {
    pub title: String,
    pub stage: Option<String>,
    #[graphql(name = "contactIds", default)]
    pub contact_ids: Vec<ID>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: Option<ID>,
    #[graphql(name = "deliveryDate")]
    pub delivery_date: Option<NaiveDate>,
    #[graphql(name = "deliveryNotes")]
    pub delivery_notes: Option<String>,
}

/// Omitted fields stay untouched; `assignedUserId: null` asks to clear the
/// assignee.
#[derive(Clone, Debug, InputObject)]
pub struct UpdateDealInput {
    pub id: ID,
    pub title: Option<String>,
    pub stage: Option<String>,
    #[graphql(name = "contactIds")]
    pub contact_ids: Option<Vec<ID>>,
    #[graphql(name = "tagIds")]
    pub tag_ids: Option<Vec<ID>>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: MaybeUndefined<ID>,
    #[graphql(name = "deliveryDate")]
    pub delivery_date: Option<NaiveDate>,
    #[graphql(name = "deliveryNotes")]
    pub delivery_notes: Option<String>,
}

#[derive(Clone, Debug, InputObject)]
pub struct NewTaskInput {
    pub title: String,
    #[graphql(name = "dealId")]
    pub deal_id: Option<ID>,
    #[graphql(name = "responsibleUserId")]
    pub responsible_user_id: Option<ID>,
    #[graphql(name = "dueDate")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct ApplyListPayload {
    pub updated: i32,
}
