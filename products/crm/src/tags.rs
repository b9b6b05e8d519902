//! Ordered deal-tag registry with fractional sort positions.
//!
//! Reordering only rewrites the dragged tag: it lands on the midpoint between
//! the drop target and the target's neighbour in the drag direction. Nothing
//! rebalances automatically; [`TagService::renumber`] is the explicit
//! maintenance pass for when indices get too close together.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    error::{CrmError, CrmResult, EntityKind, ValidationError},
    model::Tag,
    store::CrmStore,
};

/// Gap between consecutive tags after a renumber, and the boundary offset
/// used when the target has no neighbour.
pub const SORT_INDEX_STEP: f64 = 10.0;

/// Case-insensitive comparison of trimmed display names.
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Snapshot of the tag collection, sorted by index.
#[derive(Clone, Debug, Default)]
pub struct TagRegistry {
    tags: Vec<Tag>,
}

impl TagRegistry {
    pub fn new(mut tags: Vec<Tag>) -> Self {
        tags.sort_by(|a, b| a.sort_index.total_cmp(&b.sort_index));
        Self { tags }
    }

    pub fn sorted(&self) -> &[Tag] {
        &self.tags
    }

    pub fn get(&self, id: Uuid) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.id == id)
    }

    /// Case-insensitive lookup; the first tag in display order wins.
    pub fn find_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| names_match(&tag.name, name))
    }

    /// Index for a tag appended after the current last one.
    pub fn next_index(&self) -> f64 {
        self.tags
            .last()
            .map_or(SORT_INDEX_STEP, |tag| tag.sort_index + SORT_INDEX_STEP)
    }

    /// New index for `dragged` when dropped on `target`, or `None` when the
    /// drop is a no-op.
    pub fn reorder_index(&self, dragged: Uuid, target: Uuid) -> CrmResult<Option<f64>> {
        let from = self.position(dragged)?;
        let to = self.position(target)?;
        if from == to {
            return Ok(None);
        }
        let target_index = self.tags[to].sort_index;
        let new_index = if from > to {
            let before = match to.checked_sub(1) {
                Some(pos) => self.tags[pos].sort_index,
                None => target_index - SORT_INDEX_STEP,
            };
            (before + target_index) / 2.0
        } else {
            let after = self
                .tags
                .get(to + 1)
                .map_or(target_index + SORT_INDEX_STEP, |tag| tag.sort_index);
            (target_index + after) / 2.0
        };
        Ok(Some(new_index))
    }

    /// Evenly spaced indices in the current order, for tags whose index
    /// changes.
    pub fn renumbered(&self) -> Vec<(Uuid, f64)> {
        self.tags
            .iter()
            .enumerate()
            .filter_map(|(pos, tag)| {
                let index = (pos as f64 + 1.0) * SORT_INDEX_STEP;
                (tag.sort_index != index).then_some((tag.id, index))
            })
            .collect()
    }

    fn position(&self, id: Uuid) -> CrmResult<usize> {
        self.tags
            .iter()
            .position(|tag| tag.id == id)
            .ok_or_else(|| CrmError::not_found(EntityKind::Tag, id))
    }
}

#[derive(Clone)]
pub struct TagService {
    store: Arc<dyn CrmStore>,
}

impl TagService {
    pub fn new(store: Arc<dyn CrmStore>) -> Self {
        Self { store }
    }

    pub async fn registry(&self) -> CrmResult<TagRegistry> {
        Ok(TagRegistry::new(self.store.list_tags().await?))
    }

    #[instrument(name = "crm.tags.create", skip_all, fields(name = %name))]
    pub async fn create_tag(&self, name: &str, color: &str) -> CrmResult<Tag> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::TagNameRequired.into());
        }
        if trimmed.chars().count() > 128 {
            return Err(ValidationError::TooLong {
                field: "name",
                max: 128,
            }
            .into());
        }
        let registry = self.registry().await?;
        let tag = Tag {
            id: Uuid::new_v4(),
            name: trimmed.to_string(),
            color: color.trim().to_string(),
            sort_index: registry.next_index(),
        };
        self.store.insert_tag(tag).await
    }

    /// Moves `dragged` next to `target` and returns the dragged tag.
    #[instrument(name = "crm.tags.reorder", skip(self))]
    pub async fn reorder(&self, dragged: Uuid, target: Uuid) -> CrmResult<Tag> {
        let registry = self.registry().await?;
        match registry.reorder_index(dragged, target)? {
            Some(index) => {
                debug!(index, "tag moved");
                self.store.set_tag_index(dragged, index).await
            }
            None => registry
                .get(dragged)
                .cloned()
                .ok_or_else(|| CrmError::not_found(EntityKind::Tag, dragged)),
        }
    }

    /// Rewrites every index to an even spacing, keeping the order. Returns
    /// how many tags changed.
    #[instrument(name = "crm.tags.renumber", skip_all)]
    pub async fn renumber(&self) -> CrmResult<usize> {
        let registry = self.registry().await?;
        let changes = registry.renumbered();
        for (id, index) in &changes {
            self.store.set_tag_index(*id, *index).await?;
        }
        Ok(changes.len())
    }
}
