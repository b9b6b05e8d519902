//! Shared fixtures for the sqlite-backed integration tests.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use platform_db::{DatabaseSettings, DbPool, connect};
use products_crm::{
    ArchivePolicy, AutomationConfig, Crm, DatabaseStore, FixedClock, SideEffectPolicy,
    model::{Tag, User},
    store::{TagRepository, UserDirectory},
};
use uuid::Uuid;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Fresh in-memory database with every migration applied.
pub async fn migrated_pool() -> Result<DbPool> {
    let pool = connect(&DatabaseSettings::sqlite_memory()).await?;
    Migrator::up(&pool, None).await?;
    Ok(pool)
}

pub struct Workshop {
    pub store: Arc<DatabaseStore>,
    pub crm: Crm,
    pub admin: Uuid,
    pub production: Uuid,
    pub tags: WorkshopTags,
}

pub struct WorkshopTags {
    pub serigrafia: Uuid,
    pub dtf: Uuid,
    pub uv: Uuid,
    pub received: Uuid,
}

impl Workshop {
    pub async fn new(policy: SideEffectPolicy) -> Result<Self> {
        Self::at(policy, fixed_now()).await
    }

    /// Workshop with the default users and tags on a frozen clock.
    pub async fn at(policy: SideEffectPolicy, now: DateTime<Utc>) -> Result<Self> {
        let store = Arc::new(DatabaseStore::new(migrated_pool().await?));
        let admin = insert_user(&store, "Admin").await?;
        let production = insert_user(&store, "Producción").await?;
        let tags = WorkshopTags {
            serigrafia: insert_tag(&store, "Serigrafía", 10.0).await?,
            dtf: insert_tag(&store, "DTF textil", 20.0).await?,
            uv: insert_tag(&store, "UV", 30.0).await?,
            received: insert_tag(&store, "Received", 40.0).await?,
        };
        let crm = Crm::new(
            store.clone(),
            Arc::new(FixedClock(now)),
            AutomationConfig::default().with_side_effects(policy),
            ArchivePolicy::default(),
        );
        Ok(Self {
            store,
            crm,
            admin,
            production,
            tags,
        })
    }

    /// Same database, different clock.
    pub fn crm_at(&self, now: DateTime<Utc>) -> Crm {
        Crm::new(
            self.store.clone(),
            Arc::new(FixedClock(now)),
            self.crm.engine().config().clone(),
            ArchivePolicy::default(),
        )
    }
}

pub async fn insert_user(store: &DatabaseStore, name: &str) -> Result<Uuid> {
    let user = store
        .insert_user(User {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            email: None,
        })
        .await?;
    Ok(user.id)
}

pub async fn insert_tag(store: &DatabaseStore, name: &str, sort_index: f64) -> Result<Uuid> {
    let tag = store
        .insert_tag(Tag {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color: "#607d8b".to_string(),
            sort_index,
        })
        .await?;
    Ok(tag.id)
}
