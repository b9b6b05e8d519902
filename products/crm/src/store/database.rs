use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::{app_user, contact, deal, dynamic_list, pipeline_stage, tag, task};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait, prelude::DateTimeWithTimeZone, sea_query::Expr,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    Change, ChangeFeed, ContactRepository, CrmStore, DealRepository, DynamicListRepository,
    StageCatalog, StoreEvent, TagRepository, TaskRepository, TombstoneStore, UserDirectory,
};
use crate::{
    error::{CrmError, CrmResult, EntityKind},
    model::{
        Contact, Deal, DealPatch, Delivery, DynamicList, PipelineStage, Tag, Task, User,
    },
};

/// sea-orm backed store. Every write is a single statement or transaction.
pub struct DatabaseStore {
    db: DatabaseConnection,
    feed: ChangeFeed,
}

impl DatabaseStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn notify(&self, entity: EntityKind, id: Uuid, change: Change) {
        self.feed.publish(StoreEvent::new(entity, id, change));
    }
}

fn stamp(at: DateTime<Utc>) -> DateTimeWithTimeZone {
    at.into()
}

fn utc(at: DateTimeWithTimeZone) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

fn deal_from_model(model: deal::Model) -> CrmResult<Deal> {
    Ok(Deal {
        id: model.id,
        title: model.title,
        stage: model.stage,
        contact_ids: serde_json::from_value(model.contact_ids)?,
        tag_ids: serde_json::from_value(model.tag_ids)?,
        assigned_user_id: model.assigned_user_id,
        delivery: Delivery {
            date: model.delivery_date,
            notes: model.delivery_notes,
        },
        sort_index: model.sort_index,
        created_at: utc(model.created_at),
        updated_at: utc(model.updated_at),
        deleted_at: model.deleted_at.map(utc),
    })
}

fn deal_active_model(record: &Deal) -> CrmResult<deal::ActiveModel> {
    Ok(deal::ActiveModel {
        id: Set(record.id),
        title: Set(record.title.clone()),
        stage: Set(record.stage.clone()),
        contact_ids: Set(serde_json::to_value(&record.contact_ids)?),
        tag_ids: Set(serde_json::to_value(&record.tag_ids)?),
        assigned_user_id: Set(record.assigned_user_id),
        delivery_date: Set(record.delivery.date),
        delivery_notes: Set(record.delivery.notes.clone()),
        sort_index: Set(record.sort_index),
        created_at: Set(stamp(record.created_at)),
        updated_at: Set(stamp(record.updated_at)),
        deleted_at: Set(record.deleted_at.map(stamp)),
    })
}

fn task_from_model(model: task::Model) -> Task {
    Task {
        id: model.id,
        title: model.title,
        completed: model.completed,
        due_date: model.due_date,
        deal_id: model.deal_id,
        responsible_user_id: model.responsible_user_id,
        created_at: utc(model.created_at),
        updated_at: utc(model.updated_at),
        deleted_at: model.deleted_at.map(utc),
    }
}

fn task_active_model(record: &Task) -> task::ActiveModel {
    task::ActiveModel {
        id: Set(record.id),
        title: Set(record.title.clone()),
        completed: Set(record.completed),
        due_date: Set(record.due_date),
        deal_id: Set(record.deal_id),
        responsible_user_id: Set(record.responsible_user_id),
        created_at: Set(stamp(record.created_at)),
        updated_at: Set(stamp(record.updated_at)),
        deleted_at: Set(record.deleted_at.map(stamp)),
    }
}

impl From<tag::Model> for Tag {
    fn from(model: tag::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            color: model.color,
            sort_index: model.sort_index,
        }
    }
}

impl From<app_user::Model> for User {
    fn from(model: app_user::Model) -> Self {
        Self {
            id: model.id,
            display_name: model.display_name,
            email: model.email,
        }
    }
}

impl From<pipeline_stage::Model> for PipelineStage {
    fn from(model: pipeline_stage::Model) -> Self {
        Self {
            key: model.key,
            display_name: model.display_name,
            sort_order: model.sort_order,
        }
    }
}

fn contact_from_model(model: contact::Model) -> CrmResult<Contact> {
    Ok(Contact {
        id: model.id,
        first_name: model.first_name,
        last_name: model.last_name,
        email: model.email,
        company: model.company,
        tag_ids: serde_json::from_value(model.tag_ids)?,
        folder_url: model.folder_url,
        created_at: utc(model.created_at),
        updated_at: utc(model.updated_at),
        deleted_at: model.deleted_at.map(utc),
    })
}

fn list_from_model(model: dynamic_list::Model) -> CrmResult<DynamicList> {
    Ok(DynamicList {
        id: model.id,
        name: model.name,
        tag_ids: serde_json::from_value(model.tag_ids)?,
        rules: serde_json::from_value(model.rules)?,
    })
}

#[async_trait]
impl DealRepository for DatabaseStore {
    async fn find_deal(&self, id: Uuid) -> CrmResult<Option<Deal>> {
        deal::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(deal_from_model)
            .transpose()
    }

    async fn list_deals(&self) -> CrmResult<Vec<Deal>> {
        deal::Entity::find()
            .filter(deal::Column::DeletedAt.is_null())
            .order_by_asc(deal::Column::SortIndex)
            .all(&self.db)
            .await?
            .into_iter()
            .map(deal_from_model)
            .collect()
    }

    async fn insert_deal(&self, record: Deal) -> CrmResult<Deal> {
        deal::Entity::insert(deal_active_model(&record)?)
            .exec_without_returning(&self.db)
            .await?;
        self.notify(EntityKind::Deal, record.id, Change::Created);
        Ok(record)
    }

    async fn apply_deal_patch(
        &self,
        id: Uuid,
        patch: &DealPatch,
        now: DateTime<Utc>,
    ) -> CrmResult<Deal> {
        let txn = self.db.begin().await?;
        let existing = deal::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::Deal, id))?;
        let mut record = deal_from_model(existing)?;
        patch.apply_to(&mut record, now);
        let updated = deal_active_model(&record)?.update(&txn).await?;
        txn.commit().await?;
        self.notify(EntityKind::Deal, id, Change::Updated);
        deal_from_model(updated)
    }
}

#[async_trait]
impl TaskRepository for DatabaseStore {
    async fn find_task(&self, id: Uuid) -> CrmResult<Option<Task>> {
        Ok(task::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(task_from_model))
    }

    async fn list_tasks(&self, deal_id: Option<Uuid>) -> CrmResult<Vec<Task>> {
        let mut query = task::Entity::find().filter(task::Column::DeletedAt.is_null());
        if let Some(deal_id) = deal_id {
            query = query.filter(task::Column::DealId.eq(deal_id));
        }
        Ok(query
            .order_by_asc(task::Column::CreatedAt)
            .order_by_asc(task::Column::Title)
            .all(&self.db)
            .await?
            .into_iter()
            .map(task_from_model)
            .collect())
    }

    async fn insert_task(&self, record: Task) -> CrmResult<Task> {
        task::Entity::insert(task_active_model(&record))
            .exec_without_returning(&self.db)
            .await?;
        self.notify(EntityKind::Task, record.id, Change::Created);
        Ok(record)
    }

    async fn update_task(&self, record: Task) -> CrmResult<Task> {
        if task::Entity::find_by_id(record.id)
            .one(&self.db)
            .await?
            .is_none()
        {
            return Err(CrmError::not_found(EntityKind::Task, record.id));
        }
        let updated = task_active_model(&record).update(&self.db).await?;
        self.notify(EntityKind::Task, record.id, Change::Updated);
        Ok(task_from_model(updated))
    }
}

#[async_trait]
impl TagRepository for DatabaseStore {
    async fn list_tags(&self) -> CrmResult<Vec<Tag>> {
        Ok(tag::Entity::find()
            .order_by_asc(tag::Column::SortIndex)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Tag::from)
            .collect())
    }

    async fn insert_tag(&self, record: Tag) -> CrmResult<Tag> {
        let active = tag::ActiveModel {
            id: Set(record.id),
            name: Set(record.name.clone()),
            color: Set(record.color.clone()),
            sort_index: Set(record.sort_index),
        };
        tag::Entity::insert(active)
            .exec_without_returning(&self.db)
            .await?;
        self.notify(EntityKind::Tag, record.id, Change::Created);
        Ok(record)
    }

    async fn set_tag_index(&self, id: Uuid, sort_index: f64) -> CrmResult<Tag> {
        let existing = tag::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::Tag, id))?;
        let mut active: tag::ActiveModel = existing.into();
        active.sort_index = Set(sort_index);
        let updated = active.update(&self.db).await?;
        self.notify(EntityKind::Tag, id, Change::Updated);
        Ok(updated.into())
    }
}

#[async_trait]
impl UserDirectory for DatabaseStore {
    async fn list_users(&self) -> CrmResult<Vec<User>> {
        Ok(app_user::Entity::find()
            .order_by_asc(app_user::Column::DisplayName)
            .all(&self.db)
            .await?
            .into_iter()
            .map(User::from)
            .collect())
    }

    async fn insert_user(&self, record: User) -> CrmResult<User> {
        let active = app_user::ActiveModel {
            id: Set(record.id),
            display_name: Set(record.display_name.clone()),
            email: Set(record.email.clone()),
        };
        app_user::Entity::insert(active)
            .exec_without_returning(&self.db)
            .await?;
        self.notify(EntityKind::User, record.id, Change::Created);
        Ok(record)
    }
}

#[async_trait]
impl ContactRepository for DatabaseStore {
    async fn find_contact(&self, id: Uuid) -> CrmResult<Option<Contact>> {
        contact::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(contact_from_model)
            .transpose()
    }

    async fn list_contacts(&self) -> CrmResult<Vec<Contact>> {
        contact::Entity::find()
            .filter(contact::Column::DeletedAt.is_null())
            .order_by_asc(contact::Column::FirstName)
            .order_by_asc(contact::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(contact_from_model)
            .collect()
    }

    async fn insert_contact(&self, record: Contact) -> CrmResult<Contact> {
        let active = contact::ActiveModel {
            id: Set(record.id),
            first_name: Set(record.first_name.clone()),
            last_name: Set(record.last_name.clone()),
            email: Set(record.email.clone()),
            company: Set(record.company.clone()),
            tag_ids: Set(serde_json::to_value(&record.tag_ids)?),
            folder_url: Set(record.folder_url.clone()),
            created_at: Set(stamp(record.created_at)),
            updated_at: Set(stamp(record.updated_at)),
            deleted_at: Set(record.deleted_at.map(stamp)),
        };
        contact::Entity::insert(active)
            .exec_without_returning(&self.db)
            .await?;
        self.notify(EntityKind::Contact, record.id, Change::Created);
        Ok(record)
    }

    async fn set_contact_tags(
        &self,
        id: Uuid,
        tag_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> CrmResult<Contact> {
        let existing = contact::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::Contact, id))?;
        let mut active: contact::ActiveModel = existing.into();
        active.tag_ids = Set(serde_json::to_value(&tag_ids)?);
        active.updated_at = Set(stamp(now));
        let updated = active.update(&self.db).await?;
        self.notify(EntityKind::Contact, id, Change::Updated);
        contact_from_model(updated)
    }
}

#[async_trait]
impl DynamicListRepository for DatabaseStore {
    async fn find_list(&self, id: Uuid) -> CrmResult<Option<DynamicList>> {
        dynamic_list::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(list_from_model)
            .transpose()
    }

    async fn list_lists(&self) -> CrmResult<Vec<DynamicList>> {
        dynamic_list::Entity::find()
            .order_by_asc(dynamic_list::Column::Name)
            .all(&self.db)
            .await?
            .into_iter()
            .map(list_from_model)
            .collect()
    }

    async fn insert_list(&self, record: DynamicList) -> CrmResult<DynamicList> {
        let active = dynamic_list::ActiveModel {
            id: Set(record.id),
            name: Set(record.name.clone()),
            tag_ids: Set(serde_json::to_value(&record.tag_ids)?),
            rules: Set(serde_json::to_value(&record.rules)?),
        };
        dynamic_list::Entity::insert(active)
            .exec_without_returning(&self.db)
            .await?;
        self.notify(EntityKind::DynamicList, record.id, Change::Created);
        Ok(record)
    }
}

#[async_trait]
impl StageCatalog for DatabaseStore {
    async fn list_stages(&self) -> CrmResult<Vec<PipelineStage>> {
        Ok(pipeline_stage::Entity::find()
            .order_by_asc(pipeline_stage::Column::SortOrder)
            .all(&self.db)
            .await?
            .into_iter()
            .map(PipelineStage::from)
            .collect())
    }
}

#[async_trait]
impl TombstoneStore for DatabaseStore {
    async fn tombstone(&self, kind: EntityKind, id: Uuid) -> CrmResult<Option<DateTime<Utc>>> {
        let found = match kind {
            EntityKind::Deal => deal::Entity::find_by_id(id)
                .one(&self.db)
                .await?
                .map(|model| model.deleted_at),
            EntityKind::Task => task::Entity::find_by_id(id)
                .one(&self.db)
                .await?
                .map(|model| model.deleted_at),
            EntityKind::Contact => contact::Entity::find_by_id(id)
                .one(&self.db)
                .await?
                .map(|model| model.deleted_at),
            other => return Err(unsupported(other)),
        };
        found
            .map(|deleted_at| deleted_at.map(utc))
            .ok_or_else(|| CrmError::not_found(kind, id))
    }

    async fn set_tombstone(
        &self,
        kind: EntityKind,
        id: Uuid,
        deleted_at: Option<DateTime<Utc>>,
    ) -> CrmResult<()> {
        let value = deleted_at.map(stamp);
        let rows = match kind {
            EntityKind::Deal => {
                deal::Entity::update_many()
                    .col_expr(deal::Column::DeletedAt, Expr::value(value))
                    .filter(deal::Column::Id.eq(id))
                    .exec(&self.db)
                    .await?
                    .rows_affected
            }
            EntityKind::Task => {
                task::Entity::update_many()
                    .col_expr(task::Column::DeletedAt, Expr::value(value))
                    .filter(task::Column::Id.eq(id))
                    .exec(&self.db)
                    .await?
                    .rows_affected
            }
            EntityKind::Contact => {
                contact::Entity::update_many()
                    .col_expr(contact::Column::DeletedAt, Expr::value(value))
                    .filter(contact::Column::Id.eq(id))
                    .exec(&self.db)
                    .await?
                    .rows_affected
            }
            other => return Err(unsupported(other)),
        };
        if rows == 0 {
            return Err(CrmError::not_found(kind, id));
        }
        let change = if deleted_at.is_some() {
            Change::Archived
        } else {
            Change::Restored
        };
        self.notify(kind, id, change);
        Ok(())
    }

    async fn purge_tombstones(
        &self,
        kind: EntityKind,
        cutoff: DateTime<Utc>,
    ) -> CrmResult<Vec<Uuid>> {
        let cutoff = stamp(cutoff);
        let txn = self.db.begin().await?;
        let ids: Vec<Uuid> = match kind {
            EntityKind::Deal => {
                let ids: Vec<Uuid> = deal::Entity::find()
                    .filter(deal::Column::DeletedAt.lt(cutoff))
                    .all(&txn)
                    .await?
                    .into_iter()
                    .map(|model| model.id)
                    .collect();
                deal::Entity::delete_many()
                    .filter(deal::Column::Id.is_in(ids.clone()))
                    .exec(&txn)
                    .await?;
                ids
            }
            EntityKind::Task => {
                let ids: Vec<Uuid> = task::Entity::find()
                    .filter(task::Column::DeletedAt.lt(cutoff))
                    .all(&txn)
                    .await?
                    .into_iter()
                    .map(|model| model.id)
                    .collect();
                task::Entity::delete_many()
                    .filter(task::Column::Id.is_in(ids.clone()))
                    .exec(&txn)
                    .await?;
                ids
            }
            EntityKind::Contact => {
                let ids: Vec<Uuid> = contact::Entity::find()
                    .filter(contact::Column::DeletedAt.lt(cutoff))
                    .all(&txn)
                    .await?
                    .into_iter()
                    .map(|model| model.id)
                    .collect();
                contact::Entity::delete_many()
                    .filter(contact::Column::Id.is_in(ids.clone()))
                    .exec(&txn)
                    .await?;
                ids
            }
            other => return Err(unsupported(other)),
        };
        txn.commit().await?;
        for id in &ids {
            self.notify(kind, *id, Change::Purged);
        }
        Ok(ids)
    }
}

fn unsupported(kind: EntityKind) -> CrmError {
    CrmError::store(anyhow!("{kind} records cannot be archived"))
}

impl CrmStore for DatabaseStore {
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.feed.subscribe()
    }
}
