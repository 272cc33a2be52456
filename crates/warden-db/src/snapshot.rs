//! JSON snapshots of role configuration and collection metadata, and the
//! default role seed.
//!
//! A snapshot nests resources under roles and actions under resources, the
//! same shape the full rebuild reads back:
//!
//! ```json
//! {
//!   "roles": [
//!     { "name": "member", "title": "Member", "default": true,
//!       "strategy": { "actions": ["view"] },
//!       "resources": [
//!         { "name": "orders",
//!           "actions": [{ "name": "update", "fields": ["total"] }] }
//!       ] }
//!   ],
//!   "collections": {
//!     "orders": [
//!       { "name": "total" },
//!       { "name": "items", "association": { "kind": "linkTo", "target": "lineItems" } }
//!     ]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, instrument};

use warden_core::{
    FieldMeta, ResourceAction, Result, Role, RoleResource, RoleStrategy, TransactionId,
    WardenError,
};

use crate::store::{MemoryStore, StoreState};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub roles: Vec<RoleSnapshot>,
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<FieldMeta>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub strategy: Option<RoleStrategy>,
    #[serde(default)]
    pub resources: Vec<ResourceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub name: String,
    #[serde(default = "default_true", rename = "usingActionsConfig", alias = "using_actions_config")]
    pub using_actions_config: bool,
    #[serde(default)]
    pub actions: Vec<ActionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub scope: Option<serde_json::Value>,
}

impl StoreSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| WardenError::invalid_input(format!("Invalid store snapshot: {}", e)))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            WardenError::storage(format!("Failed to read snapshot {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Check the ownership invariants a store relies on
    fn validate(&self) -> Result<()> {
        let mut roles = BTreeSet::new();
        let mut defaults = 0;
        for role in &self.roles {
            if role.name.is_empty() {
                return Err(WardenError::invalid_input("Role name must not be empty"));
            }
            if !roles.insert(role.name.as_str()) {
                return Err(WardenError::invalid_input(format!(
                    "Duplicate role '{}'",
                    role.name
                )));
            }
            if role.default {
                defaults += 1;
            }

            let mut resources = BTreeSet::new();
            for resource in &role.resources {
                if !resources.insert(resource.name.as_str()) {
                    return Err(WardenError::invalid_input(format!(
                        "Duplicate resource '{}' on role '{}'",
                        resource.name, role.name
                    )));
                }
            }
        }
        if defaults > 1 {
            return Err(WardenError::invalid_input(
                "At most one role may be marked default",
            ));
        }
        Ok(())
    }

    fn into_state(self) -> (StoreState, BTreeMap<String, Vec<FieldMeta>>) {
        let mut state = StoreState::default();
        for snapshot in self.roles {
            let mut role = Role::new(
                snapshot.name.clone(),
                snapshot.title.unwrap_or_else(|| snapshot.name.clone()),
            );
            role.hidden = snapshot.hidden;
            role.default = snapshot.default;
            role.strategy = snapshot.strategy;

            for resource_snapshot in snapshot.resources {
                let mut resource = RoleResource::new(&snapshot.name, resource_snapshot.name);
                resource.using_actions_config = resource_snapshot.using_actions_config;

                for action_snapshot in resource_snapshot.actions {
                    let mut action = ResourceAction::new(resource.id, action_snapshot.name)
                        .with_fields(action_snapshot.fields);
                    action.scope = action_snapshot.scope;
                    state.actions.insert(action.id, action);
                }
                state.resources.insert(resource.id, resource);
            }
            state.roles.insert(role.name.clone(), role);
        }
        (state, self.collections)
    }
}

/// `root` (hidden), `admin`, `member` (default) and `anonymous`
pub fn default_roles() -> Vec<Role> {
    vec![
        Role::new("root", "Root").hidden(),
        Role::new("admin", "Admin"),
        Role::new("member", "Member").as_default(),
        Role::new("anonymous", "Anonymous"),
    ]
}

impl MemoryStore {
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        snapshot.validate()?;
        let (state, collections) = snapshot.into_state();
        Ok(Self::from_parts(state, collections))
    }

    #[instrument]
    pub async fn load_snapshot(path: &Path) -> Result<Self> {
        let snapshot = StoreSnapshot::from_file(path).await?;
        info!(
            roles = snapshot.roles.len(),
            collections = snapshot.collections.len(),
            "Loaded store snapshot"
        );
        Self::from_snapshot(snapshot)
    }

    /// Insert the default roles when no role exists yet; returns how many
    /// were created
    #[instrument(skip(self))]
    pub async fn seed_default_roles(&self, tx: Option<TransactionId>) -> Result<usize> {
        if !self.roles(tx).await?.is_empty() {
            return Ok(0);
        }
        let roles = default_roles();
        let count = roles.len();
        for role in roles {
            self.upsert_role(role, tx).await?;
        }
        info!(count, "Seeded default roles");
        Ok(count)
    }
}
