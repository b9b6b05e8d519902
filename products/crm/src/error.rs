use std::{fmt, sync::Arc};

use thiserror::Error;
use uuid::Uuid;

pub type CrmResult<T> = Result<T, CrmError>;

/// Record kinds addressed by the store and by the archive sweep.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum EntityKind {
    Deal,
    Task,
    Tag,
    Contact,
    User,
    DynamicList,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Deal => "deal",
            EntityKind::Task => "task",
            EntityKind::Tag => "tag",
            EntityKind::Contact => "contact",
            EntityKind::User => "user",
            EntityKind::DynamicList => "dynamic_list",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business-rule violations. Messages are shown to the end user as-is.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("deal cannot be left without an assignee")]
    AssignmentRequired,
    #[error("a deal in production needs at least one tag")]
    ProductionRequiresTag,
    #[error("task needs a responsible user")]
    TaskUnassigned,
    #[error("title is required")]
    TitleRequired,
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("unknown pipeline stage `{0}`")]
    UnknownStage(String),
    #[error("tag name is required")]
    TagNameRequired,
    #[error("contact first name is required")]
    FirstNameRequired,
    #[error("dynamic list name is required")]
    ListNameRequired,
    #[error("record was archived more than {days} days ago and can no longer be restored")]
    RestoreWindowExpired { days: i64 },
    #[error("record is not archived")]
    NotArchived,
}

#[derive(Clone, Debug, Error)]
pub enum CrmError {
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: Uuid },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("store error: {0}")]
    Store(Arc<anyhow::Error>),
}

impl CrmError {
    pub fn not_found(entity: EntityKind, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::Store(Arc::new(err.into()))
    }

    /// Returns the validation failure, if this is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            CrmError::Validation(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CrmError::NotFound { .. })
    }
}

impl From<sea_orm::DbErr> for CrmError {
    fn from(value: sea_orm::DbErr) -> Self {
        Self::store(value)
    }
}

impl From<serde_json::Error> for CrmError {
    fn from(value: serde_json::Error) -> Self {
        Self::store(value)
    }
}
