//! Deal update pipeline with its automation triggers.
//!
//! Every deal change goes through [`AutomationEngine::apply_deal_update`].
//! The engine turns the caller's patch into an [`UpdatePlan`] by running the
//! fixed [`TRIGGERS`] list, checks the production-tag invariant and then
//! writes the patch in one store call. Planning is pure so the rules can be
//! exercised without a store.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::{AutomationConfig, SideEffectPolicy, TaskTemplate},
    error::{CrmError, CrmResult, EntityKind, ValidationError},
    model::{Deal, DealPatch, NewTask, User},
    store::CrmStore,
    tags::{TagRegistry, names_match},
    tasks::TaskService,
};

/// Automation rules, in the order they run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// Entering the material stage creates a purchase task for the assignee.
    MaterialPurchaseTask,
    /// Entering production adds the "received" tag when it is registered.
    ProductionReceivedTag,
    /// Newly added technique tags create their configured tasks.
    TechniqueTasks,
    /// Leaving production clears every tag.
    ExitProductionClearTags,
}

pub const TRIGGERS: [Trigger; 4] = [
    Trigger::MaterialPurchaseTask,
    Trigger::ProductionReceivedTag,
    Trigger::TechniqueTasks,
    Trigger::ExitProductionClearTags,
];

/// Template whose assignee could not be resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedTask {
    pub title: String,
    pub assignee: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdatePlan {
    /// Patch to persist; `tag_ids` is always resolved.
    pub patch: DealPatch,
    pub tasks: Vec<NewTask>,
    pub skipped: Vec<SkippedTask>,
    /// Final invariant failure. Tasks may still be created before it is
    /// reported under [`SideEffectPolicy::Immediate`].
    pub violation: Option<ValidationError>,
}

struct Transition<'a> {
    deal: &'a Deal,
    original_stage: &'a str,
    new_stage: String,
    assignee: Option<Uuid>,
    final_tags: Vec<Uuid>,
}

impl Transition<'_> {
    fn entered(&self, stage: &str) -> bool {
        self.original_stage != stage && self.new_stage == stage
    }

    fn left(&self, stage: &str) -> bool {
        self.original_stage == stage && self.new_stage != stage
    }
}

/// Snapshot the planner reads from; loaded once per update.
pub struct PlanInputs<'a> {
    pub config: &'a AutomationConfig,
    pub tags: &'a TagRegistry,
    pub users: &'a [User],
    pub today: NaiveDate,
}

impl PlanInputs<'_> {
    fn user_named(&self, name: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|user| names_match(&user.display_name, name))
    }

    fn task(&self, deal_id: Uuid, title: &str, user_id: Uuid) -> NewTask {
        NewTask {
            title: title.to_string(),
            deal_id: Some(deal_id),
            responsible_user_id: Some(user_id),
            due_date: Some(self.today),
        }
    }
}

/// Computes what an update will write and which tasks it creates.
///
/// Clearing the assignee is rejected outright; the production-tag check is
/// returned in [`UpdatePlan::violation`] so the caller can order side effects.
pub fn plan_update(
    inputs: &PlanInputs<'_>,
    deal: &Deal,
    mut patch: DealPatch,
) -> Result<UpdatePlan, ValidationError> {
    if patch.clears_assignee() {
        return Err(ValidationError::AssignmentRequired);
    }

    let mut final_tags = Vec::new();
    for id in patch.tag_ids.as_ref().unwrap_or(&deal.tag_ids) {
        if !final_tags.contains(id) {
            final_tags.push(*id);
        }
    }
    let mut transition = Transition {
        deal,
        original_stage: &deal.stage,
        new_stage: patch.stage.clone().unwrap_or_else(|| deal.stage.clone()),
        assignee: patch.assigned_user_id.flatten().or(deal.assigned_user_id),
        final_tags,
    };

    let mut plan = UpdatePlan::default();
    for trigger in TRIGGERS {
        fire(trigger, inputs, &mut transition, &mut plan);
    }

    let tags = std::mem::take(&mut transition.final_tags);
    if transition.new_stage == inputs.config.production_stage && tags.is_empty() {
        plan.violation = Some(ValidationError::ProductionRequiresTag);
    }
    patch.tag_ids = Some(tags);
    plan.patch = patch;
    Ok(plan)
}

fn fire(
    trigger: Trigger,
    inputs: &PlanInputs<'_>,
    t: &mut Transition<'_>,
    plan: &mut UpdatePlan,
) {
    let config = inputs.config;
    match trigger {
        Trigger::MaterialPurchaseTask => {
            if !t.entered(&config.material_stage) {
                return;
            }
            match t.assignee {
                Some(user_id) => plan.tasks.push(inputs.task(
                    t.deal.id,
                    &config.material_task_title,
                    user_id,
                )),
                None => debug!(deal_id = %t.deal.id, "no assignee for material task"),
            }
        }
        Trigger::ProductionReceivedTag => {
            if !t.entered(&config.production_stage) {
                return;
            }
            if let Some(tag) = inputs.tags.find_by_name(&config.received_tag) {
                if !t.final_tags.contains(&tag.id) {
                    t.final_tags.push(tag.id);
                }
            }
        }
        Trigger::TechniqueTasks => {
            let added = t
                .final_tags
                .iter()
                .filter(|id| !t.deal.tag_ids.contains(id));
            for tag in added.filter_map(|id| inputs.tags.get(*id)) {
                let Some(rule) = config
                    .techniques
                    .iter()
                    .find(|rule| names_match(&rule.tag_name, &tag.name))
                else {
                    continue;
                };
                for TaskTemplate { title, assignee } in &rule.tasks {
                    match inputs.user_named(assignee) {
                        Some(user) => plan.tasks.push(inputs.task(t.deal.id, title, user.id)),
                        None => plan.skipped.push(SkippedTask {
                            title: title.clone(),
                            assignee: assignee.clone(),
                        }),
                    }
                }
            }
        }
        Trigger::ExitProductionClearTags => {
            if t.left(&config.production_stage) {
                t.final_tags.clear();
            }
        }
    }
}

#[derive(Clone)]
pub struct AutomationEngine {
    store: Arc<dyn CrmStore>,
    tasks: TaskService,
    clock: Arc<dyn Clock>,
    config: Arc<AutomationConfig>,
}

impl AutomationEngine {
    pub fn new(
        store: Arc<dyn CrmStore>,
        tasks: TaskService,
        clock: Arc<dyn Clock>,
        config: Arc<AutomationConfig>,
    ) -> Self {
        Self {
            store,
            tasks,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// Applies `updater`'s patch to the deal, running the automation
    /// triggers, and returns the stored deal.
    #[instrument(
        name = "crm.deals.update",
        skip(self, updater),
        fields(policy = %self.config.side_effects)
    )]
    pub async fn apply_deal_update<F>(&self, deal_id: Uuid, updater: F) -> CrmResult<Deal>
    where
        F: FnOnce(&Deal) -> DealPatch + Send,
    {
        let current = self
            .store
            .find_deal(deal_id)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::Deal, deal_id))?;
        let patch = updater(&current);
        if patch.clears_assignee() {
            return Err(ValidationError::AssignmentRequired.into());
        }

        let tags = TagRegistry::new(self.store.list_tags().await?);
        let users = self.store.list_users().await?;
        let inputs = PlanInputs {
            config: &self.config,
            tags: &tags,
            users: &users,
            today: self.clock.today(),
        };
        let plan = plan_update(&inputs, &current, patch)?;
        for skipped in &plan.skipped {
            warn!(
                task = %skipped.title,
                assignee = %skipped.assignee,
                "automation task skipped: user not found"
            );
        }

        match self.config.side_effects {
            SideEffectPolicy::Immediate => {
                self.create_tasks(&plan.tasks).await?;
                if let Some(violation) = plan.violation {
                    return Err(violation.into());
                }
            }
            SideEffectPolicy::Deferred => {
                if let Some(violation) = plan.violation {
                    return Err(violation.into());
                }
                self.create_tasks(&plan.tasks).await?;
            }
        }

        let updated = self
            .store
            .apply_deal_patch(deal_id, &plan.patch, self.clock.now())
            .await?;
        debug!(
            stage = %updated.stage,
            tags = updated.tag_ids.len(),
            tasks = plan.tasks.len(),
            "deal updated"
        );
        Ok(updated)
    }

    async fn create_tasks(&self, tasks: &[NewTask]) -> CrmResult<()> {
        for task in tasks {
            self.tasks.create_task(task.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{
        archive::Archive,
        clock::FixedClock,
        config::ArchivePolicy,
        model::{Delivery, Tag, Task},
        store::{DealRepository, MemoryStore, TagRepository, TaskRepository, UserDirectory},
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 9, 30, 0).unwrap()
    }

    struct Workshop {
        store: Arc<MemoryStore>,
        engine: AutomationEngine,
        admin: Uuid,
        production: Uuid,
        received: Uuid,
        serigrafia: Uuid,
        dtf: Uuid,
        uv: Uuid,
    }

    impl Workshop {
        async fn new(policy: SideEffectPolicy) -> Self {
            Self::build(policy, &["Admin", "Producción"], true).await
        }

        async fn build(policy: SideEffectPolicy, users: &[&str], with_received: bool) -> Self {
            let store = Arc::new(MemoryStore::with_default_pipeline());
            let mut ids = Vec::new();
            for name in users {
                let user = User {
                    id: Uuid::new_v4(),
                    display_name: name.to_string(),
                    email: None,
                };
                ids.push(store.insert_user(user).await.unwrap().id);
            }
            let mut tag_names = vec!["Serigrafía", "DTF textil", "UV"];
            if with_received {
                tag_names.push("Received");
            }
            let mut tag_ids = Vec::new();
            for (pos, name) in tag_names.iter().enumerate() {
                let tag = Tag {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    color: "#333333".into(),
                    sort_index: (pos as f64 + 1.0) * 10.0,
                };
                tag_ids.push(store.insert_tag(tag).await.unwrap().id);
            }

            let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
            let archive = Archive::new(store.clone(), clock.clone(), ArchivePolicy::default());
            let tasks = TaskService::new(store.clone(), clock.clone(), archive);
            let config = Arc::new(AutomationConfig::default().with_side_effects(policy));
            let engine = AutomationEngine::new(store.clone(), tasks, clock, config);
            Self {
                store,
                engine,
                admin: ids.first().copied().unwrap_or_else(Uuid::new_v4),
                production: ids.get(1).copied().unwrap_or_else(Uuid::new_v4),
                received: tag_ids.get(3).copied().unwrap_or_else(Uuid::new_v4),
                serigrafia: tag_ids[0],
                dtf: tag_ids[1],
                uv: tag_ids[2],
            }
        }

        async fn deal(&self, stage: &str, tags: Vec<Uuid>) -> Deal {
            let deal = Deal {
                id: Uuid::new_v4(),
                title: "Club shirts".into(),
                stage: stage.into(),
                contact_ids: vec![],
                tag_ids: tags,
                assigned_user_id: Some(self.admin),
                delivery: Delivery::default(),
                sort_index: 10.0,
                created_at: now(),
                updated_at: now(),
                deleted_at: None,
            };
            self.store.insert_deal(deal).await.unwrap()
        }

        async fn tasks(&self, deal_id: Uuid) -> Vec<Task> {
            self.store.list_tasks(Some(deal_id)).await.unwrap()
        }
    }

    #[tokio::test]
    async fn clearing_the_assignee_is_rejected_without_effects() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Nuevos", vec![]).await;
        let err = shop
            .engine
            .apply_deal_update(deal.id, |_| {
                DealPatch::stage("Compra de material").clearing_assignee()
            })
            .await
            .unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::AssignmentRequired));
        assert_eq!(shop.store.find_deal(deal.id).await.unwrap(), Some(deal.clone()));
        assert!(shop.tasks(deal.id).await.is_empty());
    }

    #[tokio::test]
    async fn removing_the_last_production_tag_is_rejected() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Producción", vec![shop.uv]).await;
        let err = shop
            .engine
            .apply_deal_update(deal.id, |_| DealPatch::tags([]))
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::ProductionRequiresTag)
        );
        let stored = shop.store.find_deal(deal.id).await.unwrap().unwrap();
        assert_eq!(stored.tag_ids, vec![shop.uv]);
    }

    #[tokio::test]
    async fn entering_production_adds_the_received_tag() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Compra de material", vec![]).await;
        let updated = shop
            .engine
            .apply_deal_update(deal.id, |_| {
                DealPatch::stage("Producción").with_tags([shop.serigrafia])
            })
            .await
            .unwrap();
        assert_eq!(updated.stage, "Producción");
        assert_eq!(updated.tag_ids, vec![shop.serigrafia, shop.received]);
    }

    #[tokio::test]
    async fn received_tag_is_optional() {
        let shop = Workshop::build(SideEffectPolicy::Deferred, &["Admin", "Producción"], false).await;
        let deal = shop.deal("Nuevos", vec![]).await;
        let updated = shop
            .engine
            .apply_deal_update(deal.id, |_| DealPatch::stage("Producción").with_tags([shop.uv]))
            .await
            .unwrap();
        assert_eq!(updated.tag_ids, vec![shop.uv]);
    }

    #[tokio::test]
    async fn entering_production_without_tags_fails_even_with_received_missing() {
        let shop = Workshop::build(SideEffectPolicy::Deferred, &["Admin"], false).await;
        let deal = shop.deal("Nuevos", vec![]).await;
        let err = shop
            .engine
            .apply_deal_update(deal.id, |_| DealPatch::stage("Producción"))
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::ProductionRequiresTag)
        );
    }

    #[tokio::test]
    async fn leaving_production_clears_tags() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop
            .deal("Producción", vec![shop.uv, shop.received])
            .await;
        let updated = shop
            .engine
            .apply_deal_update(deal.id, |deal| {
                DealPatch::stage("Entregado").with_tags(deal.tag_ids.iter().copied().chain([shop.dtf]))
            })
            .await
            .unwrap();
        assert!(updated.tag_ids.is_empty());
    }

    #[tokio::test]
    async fn serigrafia_creates_one_admin_task_due_today() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Nuevos", vec![]).await;
        shop.engine
            .apply_deal_update(deal.id, |_| DealPatch::tags([shop.serigrafia]))
            .await
            .unwrap();
        let tasks = shop.tasks(deal.id).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Preparar positivo");
        assert_eq!(tasks[0].responsible_user_id, shop.admin);
        assert_eq!(tasks[0].due_date, Some(now().date_naive()));
    }

    #[tokio::test]
    async fn technique_names_match_any_casing() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let shouting = Tag {
            id: Uuid::new_v4(),
            name: "SERIGRAFÍA".into(),
            color: "#111111".into(),
            sort_index: 5.0,
        };
        let shouting = shop.store.insert_tag(shouting).await.unwrap();
        let deal = shop.deal("Nuevos", vec![]).await;
        shop.engine
            .apply_deal_update(deal.id, |_| DealPatch::tags([shouting.id]))
            .await
            .unwrap();
        let titles: Vec<_> = shop.tasks(deal.id).await.into_iter().map(|t| t.title).collect();
        assert_eq!(titles, ["Preparar positivo"]);
    }

    #[tokio::test]
    async fn missing_users_skip_their_tasks_only() {
        let shop = Workshop::build(SideEffectPolicy::Deferred, &["Producción"], true).await;
        let deal = shop.deal("Nuevos", vec![]).await;
        shop.engine
            .apply_deal_update(deal.id, |_| DealPatch::tags([shop.serigrafia, shop.dtf]))
            .await
            .unwrap();
        let titles: Vec<_> = shop.tasks(deal.id).await.into_iter().map(|t| t.title).collect();
        assert_eq!(titles, ["Estampado DTF textil"]);
    }

    #[tokio::test]
    async fn dtf_creates_tasks_for_both_roles() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Nuevos", vec![]).await;
        shop.engine
            .apply_deal_update(deal.id, |_| DealPatch::tags([shop.dtf]))
            .await
            .unwrap();
        let mut tasks: Vec<_> = shop
            .tasks(deal.id)
            .await
            .into_iter()
            .map(|t| (t.title, t.responsible_user_id))
            .collect();
        tasks.sort();
        assert_eq!(
            tasks,
            vec![
                ("Enviar diseño a impresión".to_string(), shop.admin),
                ("Estampado DTF textil".to_string(), shop.production),
            ]
        );
    }

    #[tokio::test]
    async fn already_present_tags_do_not_retrigger() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Nuevos", vec![shop.uv]).await;
        shop.engine
            .apply_deal_update(deal.id, |deal| {
                DealPatch::tags(deal.tag_ids.iter().copied().chain([shop.uv]))
            })
            .await
            .unwrap();
        assert!(shop.tasks(deal.id).await.is_empty());
    }

    #[tokio::test]
    async fn material_task_only_on_transition() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Presupuesto enviado", vec![]).await;
        shop.engine
            .apply_deal_update(deal.id, |_| DealPatch::stage("Compra de material"))
            .await
            .unwrap();
        shop.engine
            .apply_deal_update(deal.id, |_| DealPatch::stage("Compra de material"))
            .await
            .unwrap();
        let tasks = shop.tasks(deal.id).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Buy material");
        assert_eq!(tasks[0].responsible_user_id, shop.admin);
    }

    #[tokio::test]
    async fn material_task_goes_to_the_new_assignee() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Nuevos", vec![]).await;
        shop.engine
            .apply_deal_update(deal.id, |_| {
                DealPatch::stage("Compra de material").with_assignee(shop.production)
            })
            .await
            .unwrap();
        let tasks = shop.tasks(deal.id).await;
        assert_eq!(tasks[0].responsible_user_id, shop.production);
    }

    #[tokio::test]
    async fn deferred_policy_creates_no_tasks_for_rejected_updates() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let deal = shop.deal("Producción", vec![shop.uv]).await;
        let result = shop
            .engine
            .apply_deal_update(deal.id, |_| DealPatch::tags([]))
            .await;
        assert!(result.is_err());
        assert!(shop.tasks(deal.id).await.is_empty());
    }

    #[tokio::test]
    async fn immediate_policy_leaves_material_task_when_production_check_fails() {
        let shop = Workshop::build(SideEffectPolicy::Immediate, &["Admin", "Producción"], false).await;
        let mut config = AutomationConfig::default().with_side_effects(SideEffectPolicy::Immediate);
        // Collapse both stages so one transition fires the material task and
        // then fails the production check.
        config.material_stage = config.production_stage.clone();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
        let archive = Archive::new(shop.store.clone(), clock.clone(), ArchivePolicy::default());
        let tasks = TaskService::new(shop.store.clone(), clock.clone(), archive);
        let engine = AutomationEngine::new(shop.store.clone(), tasks, clock, Arc::new(config));

        let deal = shop.deal("Nuevos", vec![]).await;
        let err = engine
            .apply_deal_update(deal.id, |_| DealPatch::stage("Producción"))
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::ProductionRequiresTag)
        );
        assert_eq!(shop.tasks(deal.id).await.len(), 1);
        let stored = shop.store.find_deal(deal.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, "Nuevos");
    }

    #[tokio::test]
    async fn archived_deals_can_still_be_updated() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let mut deal = shop.deal("Nuevos", vec![]).await;
        deal.deleted_at = Some(now());
        shop.store.insert_deal(deal.clone()).await.unwrap();
        let updated = shop
            .engine
            .apply_deal_update(deal.id, |_| DealPatch {
                title: Some("Renamed".into()),
                ..DealPatch::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.title, "Renamed");
    }

    #[tokio::test]
    async fn unknown_deals_are_not_found() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let err = shop
            .engine
            .apply_deal_update(Uuid::new_v4(), |_| DealPatch::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn updates_are_stamped_by_the_injected_clock() {
        let shop = Workshop::new(SideEffectPolicy::Deferred).await;
        let last_week = now() - chrono::Duration::days(7);
        let deal = shop
            .store
            .insert_deal(Deal {
                id: Uuid::new_v4(),
                created_at: last_week,
                updated_at: last_week,
                ..shop.deal("Nuevos", vec![]).await
            })
            .await
            .unwrap();
        let updated = shop
            .engine
            .apply_deal_update(deal.id, |_| DealPatch::tags([shop.uv]))
            .await
            .unwrap();
        assert_eq!(updated.created_at, last_week);
        assert_eq!(updated.updated_at, now());
    }

    #[test]
    fn plan_collapses_duplicate_tags_in_order() {
        let config = AutomationConfig::default();
        let registry = TagRegistry::default();
        let inputs = PlanInputs {
            config: &config,
            tags: &registry,
            users: &[],
            today: now().date_naive(),
        };
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let deal = Deal {
            id: Uuid::new_v4(),
            title: "x".into(),
            stage: "Nuevos".into(),
            contact_ids: vec![],
            tag_ids: vec![],
            assigned_user_id: Some(Uuid::new_v4()),
            delivery: Delivery::default(),
            sort_index: 0.0,
            created_at: now(),
            updated_at: now(),
            deleted_at: None,
        };
        let plan = plan_update(&inputs, &deal, DealPatch::tags([b, a, b])).unwrap();
        assert_eq!(plan.patch.tag_ids, Some(vec![b, a]));
        assert!(plan.tasks.is_empty());
        assert_eq!(plan.violation, None);
    }
}
