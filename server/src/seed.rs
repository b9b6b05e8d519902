use anyhow::{Context, Result};
use products_crm::{
    AutomationConfig, Crm,
    model::User,
    store::UserDirectory,
    tags::names_match,
};
use tracing::info;
use uuid::Uuid;

/// Colors handed out to technique tags in configuration order.
const TECHNIQUE_COLORS: &[&str] = &["#e53935", "#1e88e5", "#8e24aa", "#fb8c00", "#00897b"];
const RECEIVED_COLOR: &str = "#43a047";

#[derive(Debug, Default, Eq, PartialEq)]
pub struct SeedReport {
    pub users: usize,
    pub tags: usize,
}

/// Creates the automation users and the technique and received tags.
/// Running it again only fills in what is missing.
pub async fn seed(crm: &Crm, automation: &AutomationConfig) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    let wanted_users = automation
        .techniques
        .iter()
        .flat_map(|rule| rule.tasks.iter().map(|task| task.assignee.clone()));
    let mut known: Vec<String> = crm
        .store()
        .list_users()
        .await
        .context("loading users")?
        .into_iter()
        .map(|user| user.display_name)
        .collect();
    for name in wanted_users {
        if known.iter().any(|existing| names_match(existing, &name)) {
            continue;
        }
        crm.store()
            .insert_user(User {
                id: Uuid::new_v4(),
                display_name: name.clone(),
                email: None,
            })
            .await
            .with_context(|| format!("creating user {name}"))?;
        known.push(name);
        report.users += 1;
    }

    let registry = crm.tags.registry().await.context("loading tags")?;
    let wanted_tags = automation
        .techniques
        .iter()
        .zip(TECHNIQUE_COLORS.iter().cycle())
        .map(|(rule, color)| (rule.tag_name.as_str(), *color))
        .chain([(automation.received_tag.as_str(), RECEIVED_COLOR)]);
    let mut created: Vec<&str> = Vec::new();
    for (name, color) in wanted_tags {
        if registry.find_by_name(name).is_some()
            || created.iter().any(|existing| names_match(existing, name))
        {
            continue;
        }
        crm.tags
            .create_tag(name, color)
            .await
            .with_context(|| format!("creating tag {name}"))?;
        created.push(name);
        report.tags += 1;
    }

    info!(users = report.users, tags = report.tags, "seed finished");
    Ok(report)
}
