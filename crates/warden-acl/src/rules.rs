//! Association-cascade rule table and available-action aliases.
//!
//! The rule table is static configuration: for each association kind and each
//! available action on the owning resource, the actions implied on the
//! association edge and on its target resource. It is loaded once and
//! validated before the first rebuild.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use warden_core::{Result, WardenError};

/// Edge actions understood without explicit registration
pub const BUILTIN_ACTIONS: &[&str] = &[
    "list", "get", "view", "create", "update", "destroy", "add", "remove", "toggle", "set",
    "upload",
];

/// Actions implied by one (association kind, available action) pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationFieldAction {
    #[serde(rename = "associationActions", default)]
    pub association_actions: Vec<String>,
    #[serde(rename = "targetActions", default)]
    pub target_actions: Vec<String>,
}

impl AssociationFieldAction {
    pub fn new<I, S>(association_actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            association_actions: association_actions.into_iter().map(Into::into).collect(),
            target_actions: Vec::new(),
        }
    }

    pub fn with_targets<I, S>(mut self, target_actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_actions = target_actions.into_iter().map(Into::into).collect();
        self
    }
}

/// Rules of one association kind, keyed by available action name
pub type AssociationFieldActions = BTreeMap<String, AssociationFieldAction>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociationRuleTable {
    kinds: BTreeMap<String, AssociationFieldActions>,
}

impl AssociationRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `linkTo`, `attachments` and `subTable`
    pub fn with_defaults() -> Self {
        let mut table = Self::new();

        table.register(
            "linkTo",
            BTreeMap::from([
                ("view".to_string(), AssociationFieldAction::new(["list", "get"])),
                (
                    "create".to_string(),
                    AssociationFieldAction::new(["add"]).with_targets(["view"]),
                ),
                (
                    "update".to_string(),
                    AssociationFieldAction::new(["add", "remove", "toggle"])
                        .with_targets(["view"]),
                ),
            ]),
        );

        table.register(
            "attachments",
            BTreeMap::from([
                ("view".to_string(), AssociationFieldAction::new(["list", "get"])),
                ("add".to_string(), AssociationFieldAction::new(["upload", "add"])),
                (
                    "update".to_string(),
                    AssociationFieldAction::new(["update", "add", "remove", "toggle"]),
                ),
            ]),
        );

        table.register(
            "subTable",
            BTreeMap::from([
                ("view".to_string(), AssociationFieldAction::new(["list", "get"])),
                ("create".to_string(), AssociationFieldAction::new(["create"])),
                (
                    "update".to_string(),
                    AssociationFieldAction::new(["update", "destroy"]),
                ),
            ]),
        );

        table
    }

    /// Parse kinds from JSON in the `{kind: {action: {associationActions, targetActions}}}` shape
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| WardenError::invalid_rule(format!("Invalid rule table: {}", e)))
    }

    /// Register (or replace) every rule of an association kind
    pub fn register(&mut self, kind: impl Into<String>, actions: AssociationFieldActions) {
        self.kinds.insert(kind.into(), actions);
    }

    /// Merge another table in; kinds present in `other` replace ours
    pub fn merge(&mut self, other: AssociationRuleTable) {
        self.kinds.extend(other.kinds);
    }

    pub fn lookup(&self, kind: &str, available_action: &str) -> Option<&AssociationFieldAction> {
        self.kinds.get(kind)?.get(available_action)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Reject dangling action names and cycles between rule keys and their
    /// target actions
    pub fn validate(&self, available: &AvailableActions) -> Result<()> {
        for (kind, actions) in &self.kinds {
            if kind.is_empty() {
                return Err(WardenError::invalid_rule("association kind name is empty"));
            }
            for (action, rule) in actions {
                if !available.is_known(action) {
                    return Err(WardenError::invalid_rule(format!(
                        "{}: rule keyed by unknown action '{}'",
                        kind, action
                    )));
                }
                for name in rule.association_actions.iter().chain(&rule.target_actions) {
                    if !available.is_known(name) {
                        return Err(WardenError::invalid_rule(format!(
                            "{}.{}: unknown action '{}'",
                            kind, action, name
                        )));
                    }
                }
            }
        }

        self.check_cycles(available)
    }

    fn check_cycles(&self, available: &AvailableActions) -> Result<()> {
        // A target action that is itself a rule key could cascade again.
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for actions in self.kinds.values() {
            for (action, rule) in actions {
                let from = available.resolve(action).to_string();
                let targets = edges.entry(from).or_default();
                for target in &rule.target_actions {
                    targets.insert(available.resolve(target).to_string());
                }
            }
        }

        let mut done = BTreeSet::new();
        for start in edges.keys() {
            let mut path = Vec::new();
            visit(start, &edges, &mut path, &mut done)?;
        }
        Ok(())
    }
}

fn visit<'a>(
    node: &'a str,
    edges: &'a BTreeMap<String, BTreeSet<String>>,
    path: &mut Vec<&'a str>,
    done: &mut BTreeSet<&'a str>,
) -> Result<()> {
    if done.contains(node) {
        return Ok(());
    }
    if path.contains(&node) {
        path.push(node);
        return Err(WardenError::invalid_rule(format!(
            "cascade cycle: {}",
            path.join(" -> ")
        )));
    }

    path.push(node);
    if let Some(next) = edges.get(node) {
        for target in next {
            visit(target, edges, path, done)?;
        }
    }
    path.pop();
    done.insert(node);
    Ok(())
}

/// Available actions and the aliases that resolve to them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableActions {
    actions: BTreeMap<String, Vec<String>>,
    custom: BTreeSet<String>,
}

impl Default for AvailableActions {
    fn default() -> Self {
        let mut available = Self {
            actions: BTreeMap::new(),
            custom: BTreeSet::new(),
        };
        available.define("create", Vec::<String>::new());
        available.define("view", ["list", "get"]);
        available.define("update", Vec::<String>::new());
        available.define("destroy", Vec::<String>::new());
        available
    }
}

impl AvailableActions {
    pub fn define<I, S>(&mut self, name: impl Into<String>, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions
            .insert(name.into(), aliases.into_iter().map(Into::into).collect());
    }

    /// Register an action name contributed by a custom resource type
    pub fn register_custom(&mut self, name: impl Into<String>) {
        self.custom.insert(name.into());
    }

    /// The available action `name` aliases, or `name` itself
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        if self.actions.contains_key(name) {
            return name;
        }
        self.actions
            .iter()
            .find(|(_, aliases)| aliases.iter().any(|alias| alias == name))
            .map(|(available, _)| available.as_str())
            .unwrap_or(name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        BUILTIN_ACTIONS.contains(&name)
            || self.custom.contains(name)
            || self.resolve(name) != name
            || self.actions.contains_key(name)
    }
}
