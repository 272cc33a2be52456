//! Per-role, per-resource, per-action grant storage.
//!
//! The table holds no policy: it stores each key's explicit grant and the set
//! of cascade origins that justify a derived grant, and answers lookups.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Fields and row scope attached to a grant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    /// Covered fields; empty means every field
    pub fields: BTreeSet<String>,
    /// Opaque row filter, forwarded to the query layer untouched
    pub scope: Option<serde_json::Value>,
}

impl Grant {
    /// Unrestricted grant: every field, no row scope
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new<I, S>(fields: I, scope: Option<serde_json::Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            scope,
        }
    }

    pub fn covers_field(&self, field: &str) -> bool {
        self.fields.is_empty() || self.fields.contains(field)
    }
}

/// Explicit grant `(resource, action)` that produced a derived grant through
/// association field `field`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CascadeOrigin {
    pub resource: String,
    pub action: String,
    pub field: String,
}

impl CascadeOrigin {
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            field: field.into(),
        }
    }
}

/// Fully-qualified grant key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantKey {
    pub role: String,
    pub resource: String,
    pub action: String,
}

impl GrantKey {
    pub fn new(
        role: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }
}

/// Stored state of one key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantEntry {
    pub explicit: Option<Grant>,
    pub derived: Option<Grant>,
    /// Every origin currently justifying the derived grant
    pub origins: BTreeSet<CascadeOrigin>,
}

impl GrantEntry {
    /// The grant a check sees: the explicit grant wins over a derived one
    pub fn effective(&self) -> Option<&Grant> {
        self.explicit.as_ref().or_else(|| {
            if self.origins.is_empty() {
                None
            } else {
                self.derived.as_ref()
            }
        })
    }

    pub fn is_derived(&self) -> bool {
        !self.origins.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.origins.is_empty()
    }
}

type ActionMap = HashMap<String, GrantEntry>;
type ResourceMap = HashMap<String, ActionMap>;

#[derive(Debug, Clone, Default)]
pub struct GrantTable {
    roles: HashMap<String, ResourceMap>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, role: &str, resource: &str, action: &str) -> Option<&GrantEntry> {
        self.roles.get(role)?.get(resource)?.get(action)
    }

    /// Entry for a key, created empty when absent
    pub fn entry_mut(&mut self, key: &GrantKey) -> &mut GrantEntry {
        self.roles
            .entry(key.role.clone())
            .or_default()
            .entry(key.resource.clone())
            .or_default()
            .entry(key.action.clone())
            .or_default()
    }

    pub fn get_mut(&mut self, role: &str, resource: &str, action: &str) -> Option<&mut GrantEntry> {
        self.roles.get_mut(role)?.get_mut(resource)?.get_mut(action)
    }

    /// Drop a key once neither an explicit grant nor an origin justifies it,
    /// pruning emptied resource and role maps
    pub fn prune(&mut self, role: &str, resource: &str, action: &str) {
        let Some(resources) = self.roles.get_mut(role) else {
            return;
        };
        if let Some(actions) = resources.get_mut(resource) {
            if actions.get(action).is_some_and(GrantEntry::is_empty) {
                actions.remove(action);
            }
            if actions.is_empty() {
                resources.remove(resource);
            }
        }
        if resources.is_empty() {
            self.roles.remove(role);
        }
    }

    pub fn actions(&self, role: &str, resource: &str) -> Option<&ActionMap> {
        self.roles.get(role)?.get(resource)
    }

    pub fn has_resource(&self, role: &str, resource: &str) -> bool {
        self.actions(role, resource)
            .is_some_and(|actions| !actions.is_empty())
    }

    /// Names of every resource holding entries for `role`
    pub fn resources(&self, role: &str) -> Vec<String> {
        self.roles
            .get(role)
            .map(|resources| resources.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Take every entry under `(role, resource)`, derived ones included
    pub fn remove_resource(&mut self, role: &str, resource: &str) -> Option<ActionMap> {
        let resources = self.roles.get_mut(role)?;
        let removed = resources.remove(resource);
        if resources.is_empty() {
            self.roles.remove(role);
        }
        removed
    }

    pub fn remove_role(&mut self, role: &str) -> bool {
        self.roles.remove(role).is_some()
    }

    pub fn clear(&mut self) {
        self.roles.clear();
    }

    pub fn len(&self) -> usize {
        self.roles
            .values()
            .flat_map(|resources| resources.values())
            .map(|actions| actions.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered view of every effective grant
    pub fn effective_grants(&self) -> BTreeMap<GrantKey, Grant> {
        let mut grants = BTreeMap::new();
        for (role, resources) in &self.roles {
            for (resource, actions) in resources {
                for (action, entry) in actions {
                    if let Some(grant) = entry.effective() {
                        grants.insert(GrantKey::new(role, resource, action), grant.clone());
                    }
                }
            }
        }
        grants
    }
}
