//! Storage seams consumed by the services.
//!
//! Every backend implements the full [`CrmStore`] surface and publishes a
//! [`StoreEvent`] after each committed write, so views can subscribe instead
//! of polling.

mod database;
mod memory;

pub use database::DatabaseStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    error::{CrmResult, EntityKind},
    model::{Contact, Deal, DealPatch, DynamicList, PipelineStage, Tag, Task, User},
};

const FEED_CAPACITY: usize = 256;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Change {
    Created,
    Updated,
    Archived,
    Restored,
    Purged,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StoreEvent {
    pub entity: EntityKind,
    pub id: Uuid,
    pub change: Change,
}

impl StoreEvent {
    pub fn new(entity: EntityKind, id: Uuid, change: Change) -> Self {
        Self { entity, id, change }
    }
}

/// Broadcast side of the update-and-notify contract.
#[derive(Clone, Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: StoreEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait DealRepository: Send + Sync {
    /// Looks up active and archived deals alike.
    async fn find_deal(&self, id: Uuid) -> CrmResult<Option<Deal>>;
    /// Active deals only.
    async fn list_deals(&self) -> CrmResult<Vec<Deal>>;
    async fn insert_deal(&self, deal: Deal) -> CrmResult<Deal>;
    /// Applies `patch` as one atomic write and returns the stored result.
    async fn apply_deal_patch(
        &self,
        id: Uuid,
        patch: &DealPatch,
        now: DateTime<Utc>,
    ) -> CrmResult<Deal>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_task(&self, id: Uuid) -> CrmResult<Option<Task>>;
    /// Active tasks, optionally restricted to one deal.
    async fn list_tasks(&self, deal_id: Option<Uuid>) -> CrmResult<Vec<Task>>;
    async fn insert_task(&self, task: Task) -> CrmResult<Task>;
    async fn update_task(&self, task: Task) -> CrmResult<Task>;
}

#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn list_tags(&self) -> CrmResult<Vec<Tag>>;
    async fn insert_tag(&self, tag: Tag) -> CrmResult<Tag>;
    async fn set_tag_index(&self, id: Uuid, sort_index: f64) -> CrmResult<Tag>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> CrmResult<Vec<User>>;
    async fn insert_user(&self, user: User) -> CrmResult<User>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn find_contact(&self, id: Uuid) -> CrmResult<Option<Contact>>;
    /// Active contacts only.
    async fn list_contacts(&self) -> CrmResult<Vec<Contact>>;
    async fn insert_contact(&self, contact: Contact) -> CrmResult<Contact>;
    async fn set_contact_tags(
        &self,
        id: Uuid,
        tag_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> CrmResult<Contact>;
}

#[async_trait]
pub trait DynamicListRepository: Send + Sync {
    async fn find_list(&self, id: Uuid) -> CrmResult<Option<DynamicList>>;
    async fn list_lists(&self) -> CrmResult<Vec<DynamicList>>;
    async fn insert_list(&self, list: DynamicList) -> CrmResult<DynamicList>;
}

#[async_trait]
pub trait StageCatalog: Send + Sync {
    /// Pipeline stages in board order.
    async fn list_stages(&self) -> CrmResult<Vec<PipelineStage>>;
}

/// Uniform soft-delete handling for deals, tasks and contacts.
#[async_trait]
pub trait TombstoneStore: Send + Sync {
    /// Current tombstone of a record; `NotFound` if the record is missing.
    async fn tombstone(&self, kind: EntityKind, id: Uuid) -> CrmResult<Option<DateTime<Utc>>>;
    async fn set_tombstone(
        &self,
        kind: EntityKind,
        id: Uuid,
        deleted_at: Option<DateTime<Utc>>,
    ) -> CrmResult<()>;
    /// Hard-deletes records archived before `cutoff`, returning their ids.
    async fn purge_tombstones(
        &self,
        kind: EntityKind,
        cutoff: DateTime<Utc>,
    ) -> CrmResult<Vec<Uuid>>;
}

pub trait CrmStore:
    DealRepository
    + TaskRepository
    + TagRepository
    + UserDirectory
    + ContactRepository
    + DynamicListRepository
    + StageCatalog
    + TombstoneStore
{
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Kinds that carry a `deleted_at` column.
pub(crate) fn supports_tombstone(kind: EntityKind) -> bool {
    matches!(
        kind,
        EntityKind::Deal | EntityKind::Task | EntityKind::Contact
    )
}
