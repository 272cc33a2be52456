//! Derivation of implicit grants along association fields.
//!
//! For an explicit grant `(R, A)` the resolver walks the association fields
//! the grant covers and, for every field whose kind has a rule keyed by the
//! available action behind `A`, derives grants on the association edge
//! (`R.<field>`) and on the association's target collection. Each derived
//! grant carries its [`CascadeOrigin`] so revocation can be reference-counted.
//!
//! The resolver is pure: all schema lookups happen before it runs, and the
//! output is sorted and deduplicated, so replaying the same input always
//! yields the same derived set.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use warden_core::{FieldMeta, ResourceAction, ResourceWithActions, Result, RoleResource};

use crate::grant_table::{CascadeOrigin, Grant};
use crate::rules::{AssociationRuleTable, AvailableActions};

/// A grant implied by an explicit one
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DerivedGrant {
    pub resource: String,
    pub action: String,
    pub origin: CascadeOrigin,
}

/// An explicit grant as read from a persisted action
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitGrant {
    pub action: String,
    pub grant: Grant,
}

impl From<&ResourceAction> for ExplicitGrant {
    fn from(action: &ResourceAction) -> Self {
        Self {
            action: action.name.clone(),
            grant: Grant::new(action.fields.iter().cloned(), action.scope.clone()),
        }
    }
}

/// Everything a resource contributes to the registry, replacing what it
/// contributed before
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePlan {
    pub role: String,
    pub resource: String,
    pub explicit: Vec<ExplicitGrant>,
    pub derived: Vec<DerivedGrant>,
}

/// What a single action contributes, leaving its siblings untouched
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub role: String,
    pub resource: String,
    pub action: String,
    /// `None` when the resource is not using per-action configuration
    pub explicit: Option<Grant>,
    pub derived: Vec<DerivedGrant>,
}

#[derive(Debug, Clone)]
pub struct CascadeResolver {
    rules: Arc<AssociationRuleTable>,
    available: Arc<AvailableActions>,
}

impl CascadeResolver {
    /// Validates the rule table against the action vocabulary first
    pub fn new(rules: AssociationRuleTable, available: AvailableActions) -> Result<Self> {
        rules.validate(&available)?;
        Ok(Self {
            rules: Arc::new(rules),
            available: Arc::new(available),
        })
    }

    pub fn available_actions(&self) -> &AvailableActions {
        &self.available
    }

    pub fn rules(&self) -> &AssociationRuleTable {
        &self.rules
    }

    /// Derived grants for one explicit grant on `resource`
    pub fn derive(
        &self,
        resource: &str,
        action: &str,
        grant: &Grant,
        fields: &[FieldMeta],
    ) -> Vec<DerivedGrant> {
        let available_action = self.available.resolve(action);
        let mut derived = BTreeSet::new();

        for field in fields.iter().filter(|f| grant.covers_field(&f.name)) {
            let Some(association) = &field.association else {
                continue;
            };
            let Some(rule) = self.rules.lookup(&association.kind, available_action) else {
                continue;
            };
            let origin = CascadeOrigin::new(resource, action, &field.name);

            let edge = format!("{}.{}", resource, field.name);
            for edge_action in &rule.association_actions {
                derived.insert(DerivedGrant {
                    resource: edge.clone(),
                    action: edge_action.clone(),
                    origin: origin.clone(),
                });
            }

            if rule.target_actions.is_empty() {
                continue;
            }
            match association.target.as_deref() {
                Some(target) if !target.is_empty() => {
                    for target_action in &rule.target_actions {
                        derived.insert(DerivedGrant {
                            resource: target.to_string(),
                            action: target_action.clone(),
                            origin: origin.clone(),
                        });
                    }
                }
                _ => {
                    debug!(
                        resource = %resource,
                        field = %field.name,
                        kind = %association.kind,
                        "Association has no target collection, skipping target cascade"
                    );
                }
            }
        }

        derived.into_iter().collect()
    }

    /// Plan a resource's full contribution; `fields` is the collection schema
    pub fn plan_resource(
        &self,
        resource: &ResourceWithActions,
        fields: &[FieldMeta],
    ) -> ResourcePlan {
        let name = &resource.resource.name;
        let mut plan = ResourcePlan {
            role: resource.resource.role_name.clone(),
            resource: name.clone(),
            explicit: Vec::new(),
            derived: Vec::new(),
        };

        if !resource.resource.using_actions_config {
            return plan;
        }

        let mut derived = BTreeSet::new();
        for action in &resource.actions {
            let explicit = ExplicitGrant::from(action);
            derived.extend(self.derive(name, &explicit.action, &explicit.grant, fields));
            plan.explicit.push(explicit);
        }
        plan.derived = derived.into_iter().collect();
        plan
    }

    /// Plan one action's contribution
    pub fn plan_action(
        &self,
        resource: &RoleResource,
        action: &ResourceAction,
        fields: &[FieldMeta],
    ) -> ActionPlan {
        let mut plan = ActionPlan {
            role: resource.role_name.clone(),
            resource: resource.name.clone(),
            action: action.name.clone(),
            explicit: None,
            derived: Vec::new(),
        };

        if resource.using_actions_config {
            let explicit = ExplicitGrant::from(action);
            plan.derived = self.derive(&resource.name, &explicit.action, &explicit.grant, fields);
            plan.explicit = Some(explicit.grant);
        }
        plan
    }
}
