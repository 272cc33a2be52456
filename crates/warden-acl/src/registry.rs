//! The in-memory decision surface.
//!
//! [`PermissionRegistry`] owns the [`GrantTable`], the per-role strategies,
//! the skip rules and the index from cascade origin to the keys it derived.
//! It performs no I/O; the sync engine feeds it plans computed by the
//! [`CascadeResolver`](crate::CascadeResolver).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use warden_core::RoleStrategy;

use crate::cascade::{ActionPlan, ResourcePlan};
use crate::grant_table::{CascadeOrigin, Grant, GrantEntry, GrantKey, GrantTable};
use crate::rules::AvailableActions;
use crate::skip::{CheckContext, NamePattern, SkipCondition, SkipRule};

/// Why a check came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Skipped,
    Granted,
    Strategy,
    Denied,
}

/// Result of [`PermissionRegistry::check`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// Permitted fields; `None` means every field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<serde_json::Value>,
    pub reason: DecisionReason,
}

impl Decision {
    pub fn deny() -> Self {
        Self {
            allowed: false,
            fields: None,
            scope: None,
            reason: DecisionReason::Denied,
        }
    }

    fn skipped() -> Self {
        Self {
            allowed: true,
            fields: None,
            scope: None,
            reason: DecisionReason::Skipped,
        }
    }

    fn granted(grant: &Grant) -> Self {
        Self {
            allowed: true,
            fields: (!grant.fields.is_empty()).then(|| grant.fields.clone()),
            scope: grant.scope.clone(),
            reason: DecisionReason::Granted,
        }
    }
}

/// One mutation computed by a lifecycle handler, applied as a unit with the
/// other changes of the same notification
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    DefineRole {
        role: String,
        strategy: Option<RoleStrategy>,
    },
    RemoveRole {
        role: String,
    },
    ApplyResource(ResourcePlan),
    ApplyAction(ActionPlan),
    RevokeResource {
        role: String,
        resource: String,
    },
    RevokeAction {
        role: String,
        resource: String,
        action: String,
    },
}

/// Keys derived from each origin, per role
type DerivationIndex = HashMap<String, HashMap<CascadeOrigin, BTreeSet<(String, String)>>>;

#[derive(Debug, Clone, Default)]
pub struct PermissionRegistry {
    table: GrantTable,
    derivations: DerivationIndex,
    strategies: HashMap<String, Option<RoleStrategy>>,
    skip_rules: Vec<SkipRule>,
    available: AvailableActions,
}

impl PermissionRegistry {
    pub fn new(available: AvailableActions) -> Self {
        Self {
            available,
            ..Default::default()
        }
    }

    // =========================================================================
    // Roles
    // =========================================================================

    /// Register a role and its strategy, replacing any previous strategy
    pub fn define_role(&mut self, name: impl Into<String>, strategy: Option<RoleStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn roles(&self) -> BTreeSet<String> {
        self.strategies.keys().cloned().collect()
    }

    /// Drop the role with every grant and derivation it holds
    pub fn remove_role(&mut self, name: &str) -> bool {
        let had_grants = self.table.remove_role(name);
        self.derivations.remove(name);
        self.strategies.remove(name).is_some() || had_grants
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Upsert one grant; with an origin the grant is recorded as derived
    pub fn grant(
        &mut self,
        role: &str,
        resource: &str,
        action: &str,
        grant: Grant,
        origin: Option<CascadeOrigin>,
    ) {
        let key = GrantKey::new(role, resource, action);
        let entry = self.table.entry_mut(&key);

        match origin {
            None => entry.explicit = Some(grant),
            Some(origin) => {
                entry.derived = Some(grant);
                entry.origins.insert(origin.clone());
                self.derivations
                    .entry(key.role)
                    .or_default()
                    .entry(origin)
                    .or_default()
                    .insert((key.resource, key.action));
            }
        }
    }

    /// Remove the explicit grant on one action and every cascade it alone
    /// justified
    pub fn revoke_action(&mut self, role: &str, resource: &str, action: &str) {
        if let Some(entry) = self.table.get_mut(role, resource, action) {
            entry.explicit = None;
        }
        self.table.prune(role, resource, action);

        let origins = self.origins_where(role, |origin| {
            origin.resource == resource && origin.action == action
        });
        for origin in origins {
            self.remove_origin(role, &origin);
        }
    }

    /// Remove every entry under `(role, resource)`, derived ones included,
    /// and every cascade that resource alone justified elsewhere
    pub fn revoke_resource(&mut self, role: &str, resource: &str) {
        if let Some(actions) = self.table.remove_resource(role, resource) {
            for (action, entry) in actions {
                for origin in &entry.origins {
                    self.forget_derivation(role, origin, resource, &action);
                }
            }
        }
        self.retract_resource(role, resource);
    }

    /// Drop the explicit grants under `(role, resource)` and the cascades they
    /// justified; derived entries stored under `resource` on behalf of other
    /// resources stay
    fn retract_resource(&mut self, role: &str, resource: &str) {
        let actions: Vec<String> = self
            .table
            .actions(role, resource)
            .map(|actions| actions.keys().cloned().collect())
            .unwrap_or_default();

        for action in &actions {
            if let Some(entry) = self.table.get_mut(role, resource, action) {
                entry.explicit = None;
            }
            self.table.prune(role, resource, action);
        }

        let origins = self.origins_where(role, |origin| origin.resource == resource);
        for origin in origins {
            self.remove_origin(role, &origin);
        }
    }

    fn forget_derivation(&mut self, role: &str, origin: &CascadeOrigin, resource: &str, action: &str) {
        let Some(origins) = self.derivations.get_mut(role) else {
            return;
        };
        if let Some(keys) = origins.get_mut(origin) {
            keys.remove(&(resource.to_string(), action.to_string()));
            if keys.is_empty() {
                origins.remove(origin);
            }
        }
        if origins.is_empty() {
            self.derivations.remove(role);
        }
    }

    fn origins_where<F>(&self, role: &str, predicate: F) -> Vec<CascadeOrigin>
    where
        F: Fn(&CascadeOrigin) -> bool,
    {
        self.derivations
            .get(role)
            .map(|origins| origins.keys().filter(|o| predicate(o)).cloned().collect())
            .unwrap_or_default()
    }

    fn remove_origin(&mut self, role: &str, origin: &CascadeOrigin) {
        let Some(origins) = self.derivations.get_mut(role) else {
            return;
        };
        let keys = origins.remove(origin).unwrap_or_default();
        if origins.is_empty() {
            self.derivations.remove(role);
        }

        for (resource, action) in keys {
            if let Some(entry) = self.table.get_mut(role, &resource, &action) {
                entry.origins.remove(origin);
                if entry.origins.is_empty() {
                    entry.derived = None;
                }
            }
            self.table.prune(role, &resource, &action);
        }
    }

    /// Replace everything a resource contributed with `plan`
    pub fn apply_resource_plan(&mut self, plan: &ResourcePlan) {
        self.retract_resource(&plan.role, &plan.resource);
        for explicit in &plan.explicit {
            self.grant(
                &plan.role,
                &plan.resource,
                &explicit.action,
                explicit.grant.clone(),
                None,
            );
        }
        for derived in &plan.derived {
            self.grant(
                &plan.role,
                &derived.resource,
                &derived.action,
                Grant::all(),
                Some(derived.origin.clone()),
            );
        }
    }

    /// Replace what one action contributed, leaving its siblings alone
    pub fn apply_action_plan(&mut self, plan: &ActionPlan) {
        self.revoke_action(&plan.role, &plan.resource, &plan.action);
        if let Some(grant) = &plan.explicit {
            self.grant(&plan.role, &plan.resource, &plan.action, grant.clone(), None);
        }
        for derived in &plan.derived {
            self.grant(
                &plan.role,
                &derived.resource,
                &derived.action,
                Grant::all(),
                Some(derived.origin.clone()),
            );
        }
    }

    pub fn apply(&mut self, change: &RegistryChange) {
        match change {
            RegistryChange::DefineRole { role, strategy } => {
                self.define_role(role.clone(), strategy.clone())
            }
            RegistryChange::RemoveRole { role } => {
                self.remove_role(role);
            }
            RegistryChange::ApplyResource(plan) => self.apply_resource_plan(plan),
            RegistryChange::ApplyAction(plan) => self.apply_action_plan(plan),
            RegistryChange::RevokeResource { role, resource } => {
                self.revoke_resource(role, resource)
            }
            RegistryChange::RevokeAction {
                role,
                resource,
                action,
            } => self.revoke_action(role, resource, action),
        }
    }

    pub fn entry(&self, role: &str, resource: &str, action: &str) -> Option<&GrantEntry> {
        self.table.get(role, resource, action)
    }

    /// Ordered view of every effective grant
    pub fn effective_grants(&self) -> BTreeMap<GrantKey, Grant> {
        self.table.effective_grants()
    }

    /// Move the grant state of `fresh` in, keeping our skip rules
    pub fn replace_state(&mut self, fresh: PermissionRegistry) {
        self.table = fresh.table;
        self.derivations = fresh.derivations;
        self.strategies = fresh.strategies;
        self.available = fresh.available;
    }

    /// Drop every grant and role; skip rules stay registered
    pub fn clear(&mut self) {
        self.table.clear();
        self.derivations.clear();
        self.strategies.clear();
    }

    // =========================================================================
    // Skip rules & checks
    // =========================================================================

    pub fn skip(
        &mut self,
        resource: impl Into<NamePattern>,
        action: impl Into<NamePattern>,
        condition: SkipCondition,
    ) {
        self.skip_rules.push(SkipRule::new(resource, action, condition));
    }

    pub fn add_skip_rule(&mut self, rule: SkipRule) {
        self.skip_rules.push(rule);
    }

    pub fn skip_rules(&self) -> &[SkipRule] {
        &self.skip_rules
    }

    /// Skip rules, then the exact key, then the aliased available action,
    /// then the role strategy when the role holds nothing for `resource`
    pub fn check(&self, role: &str, resource: &str, action: &str, ctx: &CheckContext) -> Decision {
        if self
            .skip_rules
            .iter()
            .any(|rule| rule.applies(resource, action, ctx))
        {
            return Decision::skipped();
        }

        let canonical = self.available.resolve(action);
        let found = self
            .table
            .get(role, resource, action)
            .and_then(GrantEntry::effective)
            .or_else(|| {
                if canonical == action {
                    return None;
                }
                self.table
                    .get(role, resource, canonical)
                    .and_then(GrantEntry::effective)
            });
        if let Some(grant) = found {
            return Decision::granted(grant);
        }

        if self.table.has_resource(role, resource) {
            return Decision::deny();
        }

        let strategy = self.strategies.get(role).and_then(Option::as_ref);
        let matched = strategy.and_then(|strategy| {
            strategy
                .parsed()
                .into_iter()
                .find(|entry| entry.action == action || entry.action == canonical)
        });
        match matched {
            Some(entry) => Decision {
                allowed: true,
                fields: None,
                scope: entry.scope.map(serde_json::Value::String),
                reason: DecisionReason::Strategy,
            },
            None => Decision::deny(),
        }
    }
}
