use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    archive::Archive,
    automation::AutomationEngine,
    clock::Clock,
    error::{CrmError, CrmResult, EntityKind, ValidationError},
    model::{Deal, DealPatch, Delivery, NewDeal, NewTask, PipelineStage},
    store::CrmStore,
    tags::SORT_INDEX_STEP,
    tasks::TaskService,
    validation::{normalize_optional, validate_title},
};

/// Board-level deal operations. Every change to an existing deal is routed
/// through the [`AutomationEngine`].
#[derive(Clone)]
pub struct DealService {
    store: Arc<dyn CrmStore>,
    engine: AutomationEngine,
    tasks: TaskService,
    archive: Archive,
    clock: Arc<dyn Clock>,
}

impl DealService {
    pub fn new(
        store: Arc<dyn CrmStore>,
        engine: AutomationEngine,
        tasks: TaskService,
        archive: Archive,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            tasks,
            archive,
            clock,
        }
    }

    pub fn engine(&self) -> &AutomationEngine {
        &self.engine
    }

    /// Creates a deal at the end of its stage column together with the
    /// quote task for the assignee.
    #[instrument(name = "crm.deals.create", skip_all, fields(stage = ?input.stage))]
    pub async fn create_deal(&self, input: NewDeal) -> CrmResult<Deal> {
        let title = validate_title(&input.title)?;
        let assignee = input
            .assigned_user_id
            .ok_or(ValidationError::AssignmentRequired)?;
        let stages = self.store.list_stages().await?;
        let stage = match input.stage {
            Some(stage) => resolve_stage(&stages, &stage)?,
            None => stages
                .first()
                .map(|stage| stage.key.clone())
                .ok_or_else(|| CrmError::store(anyhow::anyhow!("pipeline has no stages")))?,
        };
        if stage == self.engine.config().production_stage {
            return Err(ValidationError::ProductionRequiresTag.into());
        }

        let now = self.clock.now();
        let sort_index = self.end_of_stage(&stage, None).await?;
        let deal = Deal {
            id: Uuid::new_v4(),
            title,
            stage,
            contact_ids: input.contact_ids,
            tag_ids: Vec::new(),
            assigned_user_id: Some(assignee),
            delivery: Delivery {
                date: input.delivery.date,
                notes: normalize_optional(input.delivery.notes),
            },
            sort_index,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let deal = self.store.insert_deal(deal).await?;
        self.tasks
            .create_task(NewTask {
                title: self.engine.config().quote_task_title.clone(),
                deal_id: Some(deal.id),
                responsible_user_id: Some(assignee),
                due_date: Some(self.clock.today()),
            })
            .await?;
        info!(deal_id = %deal.id, stage = %deal.stage, "deal created");
        Ok(deal)
    }

    pub async fn get_deal(&self, id: Uuid) -> CrmResult<Deal> {
        self.store
            .find_deal(id)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::Deal, id))
    }

    /// Active deals in board order, optionally restricted to one stage.
    pub async fn list_deals(&self, stage: Option<&str>) -> CrmResult<Vec<Deal>> {
        let stages = self.store.list_stages().await?;
        let rank = |key: &str| {
            stages
                .iter()
                .position(|stage| stage.key == key)
                .unwrap_or(usize::MAX)
        };
        let mut deals: Vec<Deal> = self
            .store
            .list_deals()
            .await?
            .into_iter()
            .filter(|deal| stage.is_none_or(|stage| deal.stage == stage))
            .collect();
        deals.sort_by(|a, b| {
            rank(&a.stage)
                .cmp(&rank(&b.stage))
                .then_with(|| a.sort_index.total_cmp(&b.sort_index))
        });
        Ok(deals)
    }

    /// Validates field-level input, then hands the patch to the engine.
    pub async fn update_deal(&self, id: Uuid, mut patch: DealPatch) -> CrmResult<Deal> {
        if let Some(title) = &patch.title {
            patch.title = Some(validate_title(title)?);
        }
        if let Some(stage) = &patch.stage {
            let stages = self.store.list_stages().await?;
            patch.stage = Some(resolve_stage(&stages, stage)?);
        }
        if let Some(delivery) = patch.delivery.as_mut() {
            delivery.notes = normalize_optional(delivery.notes.take());
        }
        self.engine.apply_deal_update(id, move |_| patch).await
    }

    /// Drops a deal into `stage`, in front of `before` when given or at the
    /// end of the column otherwise.
    #[instrument(name = "crm.deals.move", skip(self))]
    pub async fn move_deal(&self, id: Uuid, stage: &str, before: Option<Uuid>) -> CrmResult<Deal> {
        let stages = self.store.list_stages().await?;
        let stage = resolve_stage(&stages, stage)?;
        let sort_index = match before {
            Some(target) if target != id => self.index_before(&stage, id, target).await?,
            _ => self.end_of_stage(&stage, Some(id)).await?,
        };
        let patch = DealPatch {
            sort_index: Some(sort_index),
            ..DealPatch::stage(stage)
        };
        self.engine.apply_deal_update(id, move |_| patch).await
    }

    pub async fn delete_deal(&self, id: Uuid) -> CrmResult<()> {
        self.archive.archive(EntityKind::Deal, id).await.map(|_| ())
    }

    pub async fn restore_deal(&self, id: Uuid) -> CrmResult<Deal> {
        self.archive.restore(EntityKind::Deal, id).await?;
        self.get_deal(id).await
    }

    async fn column(&self, stage: &str, excluding: Option<Uuid>) -> CrmResult<Vec<Deal>> {
        let mut deals: Vec<Deal> = self
            .store
            .list_deals()
            .await?
            .into_iter()
            .filter(|deal| deal.stage == stage && Some(deal.id) != excluding)
            .collect();
        deals.sort_by(|a, b| a.sort_index.total_cmp(&b.sort_index));
        Ok(deals)
    }

    async fn end_of_stage(&self, stage: &str, excluding: Option<Uuid>) -> CrmResult<f64> {
        let column = self.column(stage, excluding).await?;
        Ok(column
            .last()
            .map_or(SORT_INDEX_STEP, |deal| deal.sort_index + SORT_INDEX_STEP))
    }

    async fn index_before(&self, stage: &str, id: Uuid, target: Uuid) -> CrmResult<f64> {
        let column = self.column(stage, Some(id)).await?;
        let pos = column
            .iter()
            .position(|deal| deal.id == target)
            .ok_or_else(|| CrmError::not_found(EntityKind::Deal, target))?;
        let target_index = column[pos].sort_index;
        let previous = match pos.checked_sub(1) {
            Some(prev) => column[prev].sort_index,
            None => target_index - SORT_INDEX_STEP,
        };
        Ok((previous + target_index) / 2.0)
    }
}

fn resolve_stage(stages: &[PipelineStage], key: &str) -> CrmResult<String> {
    stages
        .iter()
        .find(|stage| stage.key == key)
        .map(|stage| stage.key.clone())
        .ok_or_else(|| ValidationError::UnknownStage(key.to_string()).into())
}
