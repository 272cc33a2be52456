//! Startup sequencing: rules, store, skip rules, engine, rebuild

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use warden_acl::{
    Acl, AssociationRuleTable, AvailableActions, CascadeResolver, SkipCondition, SkipRule,
};
use warden_db::MemoryStore;
use warden_sync::SyncEngine;

use crate::config::Settings;

pub type Engine = SyncEngine<MemoryStore, MemoryStore, MemoryStore, MemoryStore>;

/// The engine plus the store that owns its units of work
pub struct Service {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
}

impl Service {
    pub fn new(store: Arc<MemoryStore>, resolver: CascadeResolver, acl: Acl) -> Self {
        let engine = SyncEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            resolver,
            acl,
        );
        Self { engine, store }
    }
}

/// Built-in association kinds, merged with the configured rule file, and
/// validated against the action vocabulary
pub async fn load_resolver(settings: &Settings) -> Result<CascadeResolver> {
    let mut available = AvailableActions::default();
    for action in &settings.acl.custom_actions {
        available.register_custom(action.clone());
    }

    let mut rules = AssociationRuleTable::with_defaults();
    if let Some(path) = &settings.acl.rules_path {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read association rules from {}", path))?;
        rules.merge(AssociationRuleTable::from_json(&json)?);
        info!(path = %path, "Loaded association rules");
    }

    let resolver = CascadeResolver::new(rules, available).context("Invalid association rules")?;
    info!(
        kinds = resolver.rules().kinds().count(),
        "Association rules validated"
    );
    Ok(resolver)
}

pub async fn load_store(settings: &Settings) -> Result<MemoryStore> {
    let store = match &settings.store.snapshot_path {
        Some(path) => MemoryStore::load_snapshot(Path::new(path))
            .await
            .with_context(|| format!("Failed to load store snapshot {}", path))?,
        None => MemoryStore::new(),
    };

    if settings.acl.seed_default_roles {
        store.seed_default_roles(None).await?;
    }
    Ok(store)
}

/// Bypass rules every deployment carries
pub fn default_skip_rules() -> Vec<SkipRule> {
    vec![
        SkipRule::new("roles.menuUiSchemas", "set", SkipCondition::LoggedIn),
        SkipRule::new("roles.menuUiSchemas", "toggle", SkipCondition::LoggedIn),
        SkipRule::new("roles.menuUiSchemas", "list", SkipCondition::LoggedIn),
        SkipRule::new("roles", "check", SkipCondition::LoggedIn),
        SkipRule::new(
            "*",
            "*",
            SkipCondition::predicate(|ctx| ctx.current_role.as_deref() == Some("root")),
        ),
    ]
}

/// Wire the engine and run the startup rebuild; a failed rebuild aborts
pub async fn initialize(settings: &Settings) -> Result<Service> {
    let resolver = load_resolver(settings).await?;
    let store = Arc::new(load_store(settings).await?);

    let acl = Acl::new(resolver.available_actions().clone());
    for rule in default_skip_rules() {
        acl.skip(rule).await;
    }

    let service = Service::new(store, resolver, acl);
    let report = service
        .engine
        .bootstrap()
        .await
        .context("Full rebuild failed; refusing to serve checks")?;
    info!(
        roles = report.roles,
        resources = report.resources,
        "Permission registry ready"
    );

    Ok(service)
}
