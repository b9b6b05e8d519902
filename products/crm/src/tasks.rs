use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    archive::Archive,
    clock::Clock,
    error::{CrmError, CrmResult, EntityKind, ValidationError},
    model::{NewTask, Task, TaskChanges},
    store::CrmStore,
    validation::validate_title,
};

/// Task lifecycle. Tasks only weakly reference deals: archiving a deal leaves
/// its tasks untouched.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn CrmStore>,
    clock: Arc<dyn Clock>,
    archive: Archive,
}

impl TaskService {
    pub fn new(store: Arc<dyn CrmStore>, clock: Arc<dyn Clock>, archive: Archive) -> Self {
        Self {
            store,
            clock,
            archive,
        }
    }

    #[instrument(
        name = "crm.tasks.create",
        skip_all,
        fields(deal_id = ?input.deal_id, responsible = ?input.responsible_user_id)
    )]
    pub async fn create_task(&self, input: NewTask) -> CrmResult<Task> {
        let title = validate_title(&input.title)?;
        let responsible_user_id = input
            .responsible_user_id
            .ok_or(ValidationError::TaskUnassigned)?;
        if let Some(deal_id) = input.deal_id {
            self.ensure_deal(deal_id).await?;
        }
        let now = self.clock.now();
        let task = Task {
            id: Uuid::new_v4(),
            title,
            completed: false,
            due_date: input.due_date,
            deal_id: input.deal_id,
            responsible_user_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let task = self.store.insert_task(task).await?;
        debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    #[instrument(name = "crm.tasks.update", skip(self, changes))]
    pub async fn update_task(&self, id: Uuid, changes: TaskChanges) -> CrmResult<Task> {
        let mut task = self.get(id).await?;
        if let Some(title) = changes.title {
            task.title = validate_title(&title)?;
        }
        if let Some(completed) = changes.completed {
            task.completed = completed;
        }
        if let Some(due_date) = changes.due_date {
            task.due_date = due_date;
        }
        if let Some(responsible) = changes.responsible_user_id {
            task.responsible_user_id = responsible.ok_or(ValidationError::TaskUnassigned)?;
        }
        if let Some(deal_id) = changes.deal_id {
            if let Some(deal_id) = deal_id {
                self.ensure_deal(deal_id).await?;
            }
            task.deal_id = deal_id;
        }
        task.updated_at = self.clock.now();
        self.store.update_task(task).await
    }

    pub async fn complete_task(&self, id: Uuid) -> CrmResult<Task> {
        self.set_completed(id, true).await
    }

    pub async fn reopen_task(&self, id: Uuid) -> CrmResult<Task> {
        self.set_completed(id, false).await
    }

    pub async fn delete_task(&self, id: Uuid) -> CrmResult<()> {
        self.archive.archive(EntityKind::Task, id).await.map(|_| ())
    }

    pub async fn restore_task(&self, id: Uuid) -> CrmResult<Task> {
        self.archive.restore(EntityKind::Task, id).await?;
        self.get(id).await
    }

    /// Active tasks of one deal, oldest first.
    pub async fn tasks_for_deal(&self, deal_id: Uuid) -> CrmResult<Vec<Task>> {
        self.store.list_tasks(Some(deal_id)).await
    }

    pub async fn list_tasks(&self) -> CrmResult<Vec<Task>> {
        self.store.list_tasks(None).await
    }

    pub async fn get(&self, id: Uuid) -> CrmResult<Task> {
        self.store
            .find_task(id)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::Task, id))
    }

    async fn set_completed(&self, id: Uuid, completed: bool) -> CrmResult<Task> {
        self.update_task(
            id,
            TaskChanges {
                completed: Some(completed),
                ..TaskChanges::default()
            },
        )
        .await
    }

    async fn ensure_deal(&self, deal_id: Uuid) -> CrmResult<()> {
        match self.store.find_deal(deal_id).await? {
            Some(_) => Ok(()),
            None => Err(CrmError::not_found(EntityKind::Deal, deal_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::{clock::FixedClock, config::ArchivePolicy, store::MemoryStore};

    fn service() -> (Arc<MemoryStore>, TaskService) {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 5, 2, 8, 0, 0).unwrap()));
        let archive = Archive::new(store.clone(), clock.clone(), ArchivePolicy::default());
        (store.clone(), TaskService::new(store, clock, archive))
    }

    fn new_task(title: &str, responsible: Option<Uuid>) -> NewTask {
        NewTask {
            title: title.to_string(),
            deal_id: None,
            responsible_user_id: responsible,
            due_date: NaiveDate::from_ymd_opt(2025, 5, 2),
        }
    }

    #[tokio::test]
    async fn unassigned_tasks_are_rejected() {
        let (_, tasks) = service();
        let err = tasks
            .create_task(new_task("Call back", None))
            .await
            .unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::TaskUnassigned));
        assert_eq!(err.to_string(), "task needs a responsible user");
    }

    #[tokio::test]
    async fn tasks_pointing_at_missing_deals_are_rejected() {
        let (_, tasks) = service();
        let mut input = new_task("Call back", Some(Uuid::new_v4()));
        input.deal_id = Some(Uuid::new_v4());
        assert!(tasks.create_task(input).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn complete_reopen_and_unassign() {
        let (_, tasks) = service();
        let task = tasks
            .create_task(new_task(" Call back ", Some(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(task.title, "Call back");

        assert!(tasks.complete_task(task.id).await.unwrap().completed);
        assert!(!tasks.reopen_task(task.id).await.unwrap().completed);

        let err = tasks
            .update_task(
                task.id,
                TaskChanges {
                    responsible_user_id: Some(None),
                    ..TaskChanges::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::TaskUnassigned));
    }

    #[tokio::test]
    async fn deleted_tasks_leave_the_listing_until_restored() {
        let (_, tasks) = service();
        let task = tasks
            .create_task(new_task("Pack order", Some(Uuid::new_v4())))
            .await
            .unwrap();
        tasks.delete_task(task.id).await.unwrap();
        assert!(tasks.list_tasks().await.unwrap().is_empty());

        let restored = tasks.restore_task(task.id).await.unwrap();
        assert_eq!(restored.deleted_at, None);
        assert_eq!(tasks.list_tasks().await.unwrap().len(), 1);
    }
}
