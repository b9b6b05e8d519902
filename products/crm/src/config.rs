use std::{fmt, str::FromStr};

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default workshop pipeline as `(key, display name, sort order)`.
pub const DEFAULT_PIPELINE: &[(&str, &str, i16)] = &[
    ("Nuevos", "Nuevos", 10),
    ("Presupuesto enviado", "Presupuesto enviado", 20),
    ("Compra de material", "Compra de material", 30),
    ("Producción", "Producción", 40),
    ("Entregado", "Entregado", 50),
];

pub const DEFAULT_PRODUCTION_STAGE: &str = "Producción";
pub const DEFAULT_MATERIAL_STAGE: &str = "Compra de material";
pub const DEFAULT_RECEIVED_TAG: &str = "Received";
pub const DEFAULT_ADMIN_USER: &str = "Admin";
pub const DEFAULT_PRODUCTION_USER: &str = "Producción";
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
/// Upper bound accepted for the retention window, roughly a century.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// When automation-created tasks are written relative to the final
/// production-tag check.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffectPolicy {
    /// Tasks are created as triggers fire, before the final check. A rejected
    /// update can leave its tasks behind.
    Immediate,
    /// The update is validated first; tasks are only created for updates that
    /// will be persisted.
    #[default]
    Deferred,
}

impl SideEffectPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SideEffectPolicy::Immediate => "immediate",
            SideEffectPolicy::Deferred => "deferred",
        }
    }
}

impl fmt::Display for SideEffectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SideEffectPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(SideEffectPolicy::Immediate),
            "deferred" => Ok(SideEffectPolicy::Deferred),
            other => Err(format!(
                "unknown side effect policy `{other}` (use immediate|deferred)"
            )),
        }
    }
}

/// Task created by an automation rule, assigned by user display name.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TaskTemplate {
    pub title: String,
    pub assignee: String,
}

impl TaskTemplate {
    pub fn new(title: impl Into<String>, assignee: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            assignee: assignee.into(),
        }
    }
}

/// Production technique tag and the tasks it triggers when added to a deal.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TechniqueRule {
    pub tag_name: String,
    pub tasks: Vec<TaskTemplate>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AutomationConfig {
    pub production_stage: String,
    pub material_stage: String,
    pub received_tag: String,
    pub material_task_title: String,
    pub quote_task_title: String,
    /// Evaluated in order for every tag added to a deal.
    pub techniques: Vec<TechniqueRule>,
    pub side_effects: SideEffectPolicy,
}

impl AutomationConfig {
    /// Default rules with the admin and production roles mapped to the given
    /// user display names.
    pub fn for_users(admin: &str, production: &str) -> Self {
        Self {
            production_stage: DEFAULT_PRODUCTION_STAGE.to_string(),
            material_stage: DEFAULT_MATERIAL_STAGE.to_string(),
            received_tag: DEFAULT_RECEIVED_TAG.to_string(),
            material_task_title: "Buy material".to_string(),
            quote_task_title: "Send quote".to_string(),
            techniques: default_techniques(admin, production),
            side_effects: SideEffectPolicy::default(),
        }
    }

    pub fn with_side_effects(mut self, policy: SideEffectPolicy) -> Self {
        self.side_effects = policy;
        self
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self::for_users(DEFAULT_ADMIN_USER, DEFAULT_PRODUCTION_USER)
    }
}

fn default_techniques(admin: &str, production: &str) -> Vec<TechniqueRule> {
    vec![
        TechniqueRule {
            tag_name: "Serigrafía".to_string(),
            tasks: vec![TaskTemplate::new("Preparar positivo", admin)],
        },
        TechniqueRule {
            tag_name: "DTF textil".to_string(),
            tasks: vec![
                TaskTemplate::new("Enviar diseño a impresión", admin),
                TaskTemplate::new("Estampado DTF textil", production),
            ],
        },
        TechniqueRule {
            tag_name: "UV".to_string(),
            tasks: vec![TaskTemplate::new("Impresión UV", production)],
        },
    ]
}

/// Soft-delete retention window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArchivePolicy {
    pub retention: Duration,
}

impl ArchivePolicy {
    pub fn days(days: i64) -> Self {
        Self {
            retention: Duration::days(days),
        }
    }
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self::days(DEFAULT_RETENTION_DAYS)
    }
}
