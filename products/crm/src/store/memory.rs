use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{
    Change, ChangeFeed, ContactRepository, CrmStore, DealRepository, DynamicListRepository,
    StageCatalog, StoreEvent, TagRepository, TaskRepository, TombstoneStore, UserDirectory,
    supports_tombstone,
};
use crate::{
    config::DEFAULT_PIPELINE,
    error::{CrmError, CrmResult, EntityKind},
    model::{Contact, Deal, DealPatch, DynamicList, PipelineStage, Tag, Task, Tombstoned, User},
};

#[derive(Default)]
struct State {
    deals: HashMap<Uuid, Deal>,
    tasks: HashMap<Uuid, Task>,
    tags: HashMap<Uuid, Tag>,
    users: Vec<User>,
    contacts: HashMap<Uuid, Contact>,
    lists: HashMap<Uuid, DynamicList>,
    stages: Vec<PipelineStage>,
}

/// In-process state container mirroring the remote collections.
///
/// Writes take the lock, mutate, release and then notify subscribers.
pub struct MemoryStore {
    state: RwLock<State>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_stages(Vec::new())
    }

    /// Store seeded with the default workshop pipeline.
    pub fn with_default_pipeline() -> Self {
        let stages = DEFAULT_PIPELINE
            .iter()
            .map(|(key, display_name, sort_order)| PipelineStage {
                key: key.to_string(),
                display_name: display_name.to_string(),
                sort_order: *sort_order,
            })
            .collect();
        Self::with_stages(stages)
    }

    pub fn with_stages(mut stages: Vec<PipelineStage>) -> Self {
        stages.sort_by_key(|stage| stage.sort_order);
        Self {
            state: RwLock::new(State {
                stages,
                ..State::default()
            }),
            feed: ChangeFeed::new(),
        }
    }

    fn notify(&self, entity: EntityKind, id: Uuid, change: Change) {
        self.feed.publish(StoreEvent::new(entity, id, change));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_index<T>(mut items: Vec<T>, index: impl Fn(&T) -> f64) -> Vec<T> {
    items.sort_by(|a, b| index(a).total_cmp(&index(b)));
    items
}

#[async_trait]
impl DealRepository for MemoryStore {
    async fn find_deal(&self, id: Uuid) -> CrmResult<Option<Deal>> {
        Ok(self.state.read().await.deals.get(&id).cloned())
    }

    async fn list_deals(&self) -> CrmResult<Vec<Deal>> {
        let state = self.state.read().await;
        let active = state
            .deals
            .values()
            .filter(|deal| !deal.is_archived())
            .cloned()
            .collect();
        Ok(sorted_by_index(active, |deal: &Deal| deal.sort_index))
    }

    async fn insert_deal(&self, deal: Deal) -> CrmResult<Deal> {
        self.state
            .write()
            .await
            .deals
            .insert(deal.id, deal.clone());
        self.notify(EntityKind::Deal, deal.id, Change::Created);
        Ok(deal)
    }

    async fn apply_deal_patch(
        &self,
        id: Uuid,
        patch: &DealPatch,
        now: DateTime<Utc>,
    ) -> CrmResult<Deal> {
        let updated = {
            let mut state = self.state.write().await;
            let deal = state
                .deals
                .get_mut(&id)
                .ok_or_else(|| CrmError::not_found(EntityKind::Deal, id))?;
            patch.apply_to(deal, now);
            deal.clone()
        };
        self.notify(EntityKind::Deal, id, Change::Updated);
        Ok(updated)
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn find_task(&self, id: Uuid) -> CrmResult<Option<Task>> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, deal_id: Option<Uuid>) -> CrmResult<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| !task.is_archived())
            .filter(|task| deal_id.is_none() || task.deal_id == deal_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(tasks)
    }

    async fn insert_task(&self, task: Task) -> CrmResult<Task> {
        self.state
            .write()
            .await
            .tasks
            .insert(task.id, task.clone());
        self.notify(EntityKind::Task, task.id, Change::Created);
        Ok(task)
    }

    async fn update_task(&self, task: Task) -> CrmResult<Task> {
        {
            let mut state = self.state.write().await;
            let slot = state
                .tasks
                .get_mut(&task.id)
                .ok_or_else(|| CrmError::not_found(EntityKind::Task, task.id))?;
            *slot = task.clone();
        }
        self.notify(EntityKind::Task, task.id, Change::Updated);
        Ok(task)
    }
}

#[async_trait]
impl TagRepository for MemoryStore {
    async fn list_tags(&self) -> CrmResult<Vec<Tag>> {
        let tags = self.state.read().await.tags.values().cloned().collect();
        Ok(sorted_by_index(tags, |tag: &Tag| tag.sort_index))
    }

    async fn insert_tag(&self, tag: Tag) -> CrmResult<Tag> {
        self.state.write().await.tags.insert(tag.id, tag.clone());
        self.notify(EntityKind::Tag, tag.id, Change::Created);
        Ok(tag)
    }

    async fn set_tag_index(&self, id: Uuid, sort_index: f64) -> CrmResult<Tag> {
        let updated = {
            let mut state = self.state.write().await;
            let tag = state
                .tags
                .get_mut(&id)
                .ok_or_else(|| CrmError::not_found(EntityKind::Tag, id))?;
            tag.sort_index = sort_index;
            tag.clone()
        };
        self.notify(EntityKind::Tag, id, Change::Updated);
        Ok(updated)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn list_users(&self) -> CrmResult<Vec<User>> {
        Ok(self.state.read().await.users.clone())
    }

    async fn insert_user(&self, user: User) -> CrmResult<User> {
        self.state.write().await.users.push(user.clone());
        self.notify(EntityKind::User, user.id, Change::Created);
        Ok(user)
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn find_contact(&self, id: Uuid) -> CrmResult<Option<Contact>> {
        Ok(self.state.read().await.contacts.get(&id).cloned())
    }

    async fn list_contacts(&self) -> CrmResult<Vec<Contact>> {
        let state = self.state.read().await;
        let mut contacts: Vec<Contact> = state
            .contacts
            .values()
            .filter(|contact| !contact.is_archived())
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.first_name.cmp(&b.first_name).then(a.id.cmp(&b.id)));
        Ok(contacts)
    }

    async fn insert_contact(&self, contact: Contact) -> CrmResult<Contact> {
        self.state
            .write()
            .await
            .contacts
            .insert(contact.id, contact.clone());
        self.notify(EntityKind::Contact, contact.id, Change::Created);
        Ok(contact)
    }

    async fn set_contact_tags(
        &self,
        id: Uuid,
        tag_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> CrmResult<Contact> {
        let updated = {
            let mut state = self.state.write().await;
            let contact = state
                .contacts
                .get_mut(&id)
                .ok_or_else(|| CrmError::not_found(EntityKind::Contact, id))?;
            contact.tag_ids = tag_ids;
            contact.updated_at = now;
            contact.clone()
        };
        self.notify(EntityKind::Contact, id, Change::Updated);
        Ok(updated)
    }
}

#[async_trait]
impl DynamicListRepository for MemoryStore {
    async fn find_list(&self, id: Uuid) -> CrmResult<Option<DynamicList>> {
        Ok(self.state.read().await.lists.get(&id).cloned())
    }

    async fn list_lists(&self) -> CrmResult<Vec<DynamicList>> {
        let mut lists: Vec<DynamicList> =
            self.state.read().await.lists.values().cloned().collect();
        lists.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(lists)
    }

    async fn insert_list(&self, list: DynamicList) -> CrmResult<DynamicList> {
        self.state
            .write()
            .await
            .lists
            .insert(list.id, list.clone());
        self.notify(EntityKind::DynamicList, list.id, Change::Created);
        Ok(list)
    }
}

#[async_trait]
impl StageCatalog for MemoryStore {
    async fn list_stages(&self) -> CrmResult<Vec<PipelineStage>> {
        Ok(self.state.read().await.stages.clone())
    }
}

#[async_trait]
impl TombstoneStore for MemoryStore {
    async fn tombstone(&self, kind: EntityKind, id: Uuid) -> CrmResult<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        let found = match kind {
            EntityKind::Deal => state.deals.get(&id).map(Tombstoned::deleted_at),
            EntityKind::Task => state.tasks.get(&id).map(Tombstoned::deleted_at),
            EntityKind::Contact => state.contacts.get(&id).map(Tombstoned::deleted_at),
            other => return Err(unsupported(other)),
        };
        found.ok_or_else(|| CrmError::not_found(kind, id))
    }

    async fn set_tombstone(
        &self,
        kind: EntityKind,
        id: Uuid,
        deleted_at: Option<DateTime<Utc>>,
    ) -> CrmResult<()> {
        if !supports_tombstone(kind) {
            return Err(unsupported(kind));
        }
        {
            let mut state = self.state.write().await;
            let slot = match kind {
                EntityKind::Deal => state.deals.get_mut(&id).map(|deal| &mut deal.deleted_at),
                EntityKind::Task => state.tasks.get_mut(&id).map(|task| &mut task.deleted_at),
                _ => state
                    .contacts
                    .get_mut(&id)
                    .map(|contact| &mut contact.deleted_at),
            };
            let slot = slot.ok_or_else(|| CrmError::not_found(kind, id))?;
            *slot = deleted_at;
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
        let expired = |deleted_at: Option<DateTime<Utc>>| deleted_at.is_some_and(|at| at < cutoff);
        let purged: Vec<Uuid> = {
            let mut state = self.state.write().await;
            match kind {
                EntityKind::Deal => drain_expired(&mut state.deals, expired),
                EntityKind::Task => drain_expired(&mut state.tasks, expired),
                EntityKind::Contact => drain_expired(&mut state.contacts, expired),
                other => return Err(unsupported(other)),
            }
        };
        for id in &purged {
            self.notify(kind, *id, Change::Purged);
        }
        Ok(purged)
    }
}

fn drain_expired<T: Tombstoned>(
    records: &mut HashMap<Uuid, T>,
    expired: impl Fn(Option<DateTime<Utc>>) -> bool,
) -> Vec<Uuid> {
    let ids: Vec<Uuid> = records
        .iter()
        .filter(|(_, record)| expired(record.deleted_at()))
        .map(|(id, _)| *id)
        .collect();
    for id in &ids {
        records.remove(id);
    }
    ids
}

fn unsupported(kind: EntityKind) -> CrmError {
    CrmError::store(anyhow!("{kind} records cannot be archived"))
}

impl CrmStore for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.feed.subscribe()
    }
}
