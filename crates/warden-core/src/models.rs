//! Domain models for the Warden grant engine
//!
//! These mirror the persisted role configuration owned by the external
//! repository. Ownership is a strict tree: a [`Role`] owns its
//! [`RoleResource`]s, and each resource owns its [`ResourceAction`]s.

use crate::ids::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Roles
// =============================================================================

/// Role is a named principal grouping that permissions attach to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Unique and immutable after creation
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub hidden: bool,
    /// At most one persisted role carries `default = true`
    #[serde(default)]
    pub default: bool,
    /// Role-level policy applied to resources the role has no grants for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RoleStrategy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            title: title.into(),
            hidden: false,
            default: false,
            strategy: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn with_strategy(mut self, strategy: RoleStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Whole-role policy, e.g. `["view", "update:own"]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStrategy {
    pub actions: Vec<String>,
}

impl RoleStrategy {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }

    /// Split each entry into its action name and optional scope suffix
    pub fn parsed(&self) -> Vec<StrategyAction> {
        self.actions
            .iter()
            .map(|entry| StrategyAction::parse(entry))
            .collect()
    }
}

/// One parsed strategy entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAction {
    pub action: String,
    pub scope: Option<String>,
}

impl StrategyAction {
    pub fn parse(entry: &str) -> Self {
        match entry.split_once(':') {
            Some((action, scope)) if !scope.is_empty() => Self {
                action: action.to_string(),
                scope: Some(scope.to_string()),
            },
            Some((action, _)) => Self {
                action: action.to_string(),
                scope: None,
            },
            None => Self {
                action: entry.to_string(),
                scope: None,
            },
        }
    }
}

// =============================================================================
// Resources & Actions
// =============================================================================

/// A protectable collection, configured for exactly one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleResource {
    pub id: ResourceId,
    pub role_name: String,
    /// Collection name; unique per role
    pub name: String,
    /// `true` when explicit per-action grants follow
    #[serde(default)]
    pub using_actions_config: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleResource {
    pub fn new(role_name: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            role_name: role_name.into(),
            name: name.into(),
            using_actions_config: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted per-action grant on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAction {
    pub id: ActionId,
    pub resource_id: ResourceId,
    /// Open set: list, get, create, update, destroy, add, remove, ...
    pub name: String,
    /// Fields covered by the grant; empty means every field
    #[serde(default)]
    pub fields: Vec<String>,
    /// Row filter, opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<serde_json::Value>,
}

impl ResourceAction {
    pub fn new(resource_id: ResourceId, name: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            resource_id,
            name: name.into(),
            fields: Vec::new(),
            scope: None,
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scope(mut self, scope: serde_json::Value) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// A resource together with its nested actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceWithActions {
    pub resource: RoleResource,
    pub actions: Vec<ResourceAction>,
}

/// A role together with its nested resources and actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleWithResources {
    pub role: Role,
    pub resources: Vec<ResourceWithActions>,
}

// =============================================================================
// Schema Metadata
// =============================================================================

/// Field metadata as reported by the schema provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<Association>,
}

impl FieldMeta {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            association: None,
        }
    }

    pub fn association(
        name: impl Into<String>,
        kind: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            association: Some(Association {
                kind: kind.into(),
                target: Some(target.into()),
            }),
        }
    }
}

/// Association kind (e.g. `linkTo`, `attachments`, `subTable`) and target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub kind: String,
    /// Target collection; `None` when the metadata is incomplete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}
