use anyhow::{Context, Result, anyhow};
use platform_db::DatabaseSettings;
use products_crm::{
    ArchivePolicy, AutomationConfig, SideEffectPolicy,
    config::{
        DEFAULT_ADMIN_USER, DEFAULT_PRODUCTION_USER, DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS,
    },
};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub cors_allowed_origins: Vec<String>,
    pub automation: AutomationConfig,
    pub archive: ArchivePolicy,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.database = DatabaseSettings::from_env();
        Ok(config)
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let admin = var("CRM_ADMIN_USER").unwrap_or_else(|| DEFAULT_ADMIN_USER.into());
        let production =
            var("CRM_PRODUCTION_USER").unwrap_or_else(|| DEFAULT_PRODUCTION_USER.into());
        let mut automation = AutomationConfig::for_users(&admin, &production);
        if let Some(stage) = var("CRM_PRODUCTION_STAGE") {
            automation.production_stage = stage;
        }
        if let Some(stage) = var("CRM_MATERIAL_STAGE") {
            automation.material_stage = stage;
        }
        if let Some(tag) = var("CRM_RECEIVED_TAG") {
            automation.received_tag = tag;
        }
        if let Some(policy) = var("CRM_SIDE_EFFECTS") {
            automation.side_effects = policy
                .parse::<SideEffectPolicy>()
                .map_err(|err| anyhow!(err))
                .context("invalid CRM_SIDE_EFFECTS")?;
        }

        let retention_days = match var("CRM_ARCHIVE_RETENTION_DAYS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|days| (1..=MAX_RETENTION_DAYS).contains(days))
                .ok_or_else(|| {
                    anyhow!("CRM_ARCHIVE_RETENTION_DAYS must be between 1 and {MAX_RETENTION_DAYS}")
                })
                .with_context(|| format!("invalid CRM_ARCHIVE_RETENTION_DAYS `{raw}`"))?,
            None => DEFAULT_RETENTION_DAYS,
        };

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect::<Vec<_>>();

        let database = DatabaseSettings::new(
            var("DATABASE_URL").unwrap_or_else(|| platform_db::DEFAULT_DATABASE_URL.into()),
        );

        Ok(Self {
            database,
            cors_allowed_origins,
            automation,
            archive: ArchivePolicy::days(retention_days),
        })
    }
}
