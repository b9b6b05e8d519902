//! Workshop CRM: deals moving through a production pipeline, the tasks and
//! tags hanging off them, and rule-based contact lists.
//!
//! [`Crm`] wires every service to one store, clock and configuration. The
//! services can also be built individually for tests or tools that only need
//! one of them.

pub mod archive;
pub mod automation;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod deals;
pub mod error;
pub mod lists;
pub mod model;
pub mod store;
pub mod tags;
pub mod tasks;
pub mod validation;

use std::sync::Arc;

pub use archive::{Archive, ArchiveSweeper, SweepReport};
pub use automation::{AutomationEngine, Trigger, UpdatePlan};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ArchivePolicy, AutomationConfig, SideEffectPolicy};
pub use contacts::ContactService;
pub use deals::DealService;
pub use error::{CrmError, CrmResult, EntityKind, ValidationError};
pub use lists::DynamicListService;
pub use store::{CrmStore, DatabaseStore, MemoryStore, StoreEvent};
pub use tags::{TagRegistry, TagService};
pub use tasks::TaskService;

/// All CRM services sharing one store.
#[derive(Clone)]
pub struct Crm {
    store: Arc<dyn CrmStore>,
    pub deals: DealService,
    pub tasks: TaskService,
    pub tags: TagService,
    pub contacts: ContactService,
    pub lists: DynamicListService,
    pub sweeper: ArchiveSweeper,
}

impl Crm {
    pub fn new(
        store: Arc<dyn CrmStore>,
        clock: Arc<dyn Clock>,
        automation: AutomationConfig,
        archive: ArchivePolicy,
    ) -> Self {
        let archive = Archive::new(store.clone(), clock.clone(), archive);
        let tasks = TaskService::new(store.clone(), clock.clone(), archive.clone());
        let engine = AutomationEngine::new(
            store.clone(),
            tasks.clone(),
            clock.clone(),
            Arc::new(automation),
        );
        Self {
            deals: DealService::new(
                store.clone(),
                engine,
                tasks.clone(),
                archive.clone(),
                clock.clone(),
            ),
            contacts: ContactService::new(store.clone(), clock.clone(), archive.clone()),
            tags: TagService::new(store.clone()),
            lists: DynamicListService::new(store.clone(), clock),
            sweeper: ArchiveSweeper::new(store.clone(), archive.policy()),
            tasks,
            store,
        }
    }

    /// Default rules on the system clock.
    pub fn with_defaults(store: Arc<dyn CrmStore>) -> Self {
        Self::new(
            store,
            Arc::new(SystemClock),
            AutomationConfig::default(),
            ArchivePolicy::default(),
        )
    }

    pub fn store(&self) -> &Arc<dyn CrmStore> {
        &self.store
    }

    pub fn engine(&self) -> &AutomationEngine {
        self.deals.engine()
    }
}
