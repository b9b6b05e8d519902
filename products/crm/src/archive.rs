//! Soft delete, restore and the retention sweep.
//!
//! Deals, tasks and contacts are archived by stamping `deleted_at`. A record
//! can be restored while its tombstone is younger than the retention window;
//! [`ArchiveSweeper`] hard-deletes everything older.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::ArchivePolicy,
    error::{CrmError, CrmResult, EntityKind, ValidationError},
    store::CrmStore,
};

#[derive(Clone)]
pub struct Archive {
    store: Arc<dyn CrmStore>,
    clock: Arc<dyn Clock>,
    policy: ArchivePolicy,
}

impl Archive {
    pub fn new(store: Arc<dyn CrmStore>, clock: Arc<dyn Clock>, policy: ArchivePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> ArchivePolicy {
        self.policy
    }

    /// Stamps the tombstone. Archiving twice keeps the first timestamp.
    #[instrument(name = "crm.archive.delete", skip(self), fields(kind = %kind))]
    pub async fn archive(&self, kind: EntityKind, id: Uuid) -> CrmResult<DateTime<Utc>> {
        if let Some(existing) = self.store.tombstone(kind, id).await? {
            return Ok(existing);
        }
        let now = self.clock.now();
        self.store.set_tombstone(kind, id, Some(now)).await?;
        Ok(now)
    }

    #[instrument(name = "crm.archive.restore", skip(self), fields(kind = %kind))]
    pub async fn restore(&self, kind: EntityKind, id: Uuid) -> CrmResult<()> {
        let Some(deleted_at) = self.store.tombstone(kind, id).await? else {
            return Err(ValidationError::NotArchived.into());
        };
        if self.clock.now() - deleted_at > self.policy.retention {
            return Err(ValidationError::RestoreWindowExpired {
                days: self.policy.retention.num_days(),
            }
            .into());
        }
        self.store.set_tombstone(kind, id, None).await
    }
}

/// Counts of hard-deleted records per kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepReport {
    pub deals: usize,
    pub tasks: usize,
    pub contacts: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.deals + self.tasks + self.contacts
    }
}

#[derive(Clone)]
pub struct ArchiveSweeper {
    store: Arc<dyn CrmStore>,
    policy: ArchivePolicy,
}

impl ArchiveSweeper {
    pub fn new(store: Arc<dyn CrmStore>, policy: ArchivePolicy) -> Self {
        Self { store, policy }
    }

    /// Purges tombstones older than the retention window as of `now`.
    #[instrument(name = "crm.archive.sweep", skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> CrmResult<SweepReport> {
        let cutoff = now.checked_sub_signed(self.policy.retention).ok_or_else(|| {
            CrmError::store(anyhow!(
                "retention of {} days reaches past the earliest supported date",
                self.policy.retention.num_days()
            ))
        })?;
        let report = SweepReport {
            deals: self.purge(EntityKind::Deal, cutoff).await?,
            tasks: self.purge(EntityKind::Task, cutoff).await?,
            contacts: self.purge(EntityKind::Contact, cutoff).await?,
        };
        info!(
            deals = report.deals,
            tasks = report.tasks,
            contacts = report.contacts,
            "archive sweep finished"
        );
        Ok(report)
    }

    async fn purge(&self, kind: EntityKind, cutoff: DateTime<Utc>) -> CrmResult<usize> {
        Ok(self.store.purge_tombstones(kind, cutoff).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{
        clock::FixedClock,
        model::{Contact, Tombstoned},
        store::{ContactRepository, MemoryStore},
    };

    fn contact(now: DateTime<Utc>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: None,
            email: None,
            company: None,
            tag_ids: vec![],
            folder_url: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn restore_works_inside_the_window_only() {
        let store = Arc::new(MemoryStore::new());
        let record = store.insert_contact(contact(start())).await.unwrap();

        let archive = Archive::new(
            store.clone(),
            Arc::new(FixedClock(start())),
            ArchivePolicy::default(),
        );
        archive.archive(EntityKind::Contact, record.id).await.unwrap();
        assert!(store.list_contacts().await.unwrap().is_empty());

        let later = Archive::new(
            store.clone(),
            Arc::new(FixedClock(start() + Duration::days(31))),
            ArchivePolicy::default(),
        );
        let err = later
            .restore(EntityKind::Contact, record.id)
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::RestoreWindowExpired { days: 30 })
        );

        archive.restore(EntityKind::Contact, record.id).await.unwrap();
        let restored = store.find_contact(record.id).await.unwrap().unwrap();
        assert!(!restored.is_archived());

        let err = archive
            .restore(EntityKind::Contact, record.id)
            .await
            .unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::NotArchived));
    }

    #[tokio::test]
    async fn sweep_rejects_a_window_before_the_calendar_starts() {
        let sweeper = ArchiveSweeper::new(
            Arc::new(MemoryStore::new()),
            ArchivePolicy::days(100_000_000),
        );
        let err = sweeper.sweep(start()).await.unwrap_err();
        assert!(matches!(err, CrmError::Store(_)));
        assert!(err.to_string().contains("100000000 days"), "{err}");
    }

    #[tokio::test]
    async fn sweep_reports_purged_counts() {
        let store = Arc::new(MemoryStore::new());
        let old = store.insert_contact(contact(start())).await.unwrap();
        let fresh = store.insert_contact(contact(start())).await.unwrap();

        Archive::new(
            store.clone(),
            Arc::new(FixedClock(start())),
            ArchivePolicy::default(),
        )
        .archive(EntityKind::Contact, old.id)
        .await
        .unwrap();
        Archive::new(
            store.clone(),
            Arc::new(FixedClock(start() + Duration::days(20))),
            ArchivePolicy::default(),
        )
        .archive(EntityKind::Contact, fresh.id)
        .await
        .unwrap();

        let sweeper = ArchiveSweeper::new(store.clone(), ArchivePolicy::default());
        let report = sweeper.sweep(start() + Duration::days(40)).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                deals: 0,
                tasks: 0,
                contacts: 1
            }
        );
        assert!(store.find_contact(old.id).await.unwrap().is_none());
        assert!(store.find_contact(fresh.id).await.unwrap().is_some());
    }
}
