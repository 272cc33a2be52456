//! Bypass rules evaluated before the grant table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Resource or action name pattern: exact name or `*`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamePattern {
    Any,
    Exact(String),
}

impl NamePattern {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Exact(name) => name == value,
        }
    }
}

impl From<&str> for NamePattern {
    fn from(value: &str) -> Self {
        if value == "*" {
            NamePattern::Any
        } else {
            NamePattern::Exact(value.to_string())
        }
    }
}

impl From<String> for NamePattern {
    fn from(value: String) -> Self {
        NamePattern::from(value.as_str())
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Any => f.write_str("*"),
            NamePattern::Exact(name) => f.write_str(name),
        }
    }
}

/// Caller-supplied request context handed to skip predicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckContext {
    #[serde(default)]
    pub current_role: Option<String>,
    #[serde(default)]
    pub current_user: Option<serde_json::Value>,
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,
}

impl CheckContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            current_role: Some(role.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: serde_json::Value) -> Self {
        self.current_user = Some(user);
        self
    }
}

pub type SkipPredicate = Arc<dyn Fn(&CheckContext) -> bool + Send + Sync>;

/// When a matching skip rule applies
#[derive(Clone)]
pub enum SkipCondition {
    Always,
    /// A user is attached to the context
    LoggedIn,
    Predicate(SkipPredicate),
}

impl SkipCondition {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&CheckContext) -> bool + Send + Sync + 'static,
    {
        SkipCondition::Predicate(Arc::new(f))
    }

    pub fn evaluate(&self, ctx: &CheckContext) -> bool {
        match self {
            SkipCondition::Always => true,
            SkipCondition::LoggedIn => ctx.current_user.is_some(),
            SkipCondition::Predicate(predicate) => predicate(ctx),
        }
    }
}

impl fmt::Debug for SkipCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipCondition::Always => f.write_str("Always"),
            SkipCondition::LoggedIn => f.write_str("LoggedIn"),
            SkipCondition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkipRule {
    pub resource: NamePattern,
    pub action: NamePattern,
    pub condition: SkipCondition,
}

impl SkipRule {
    pub fn new(
        resource: impl Into<NamePattern>,
        action: impl Into<NamePattern>,
        condition: SkipCondition,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            condition,
        }
    }

    pub fn applies(&self, resource: &str, action: &str, ctx: &CheckContext) -> bool {
        self.resource.matches(resource)
            && self.action.matches(action)
            && self.condition.evaluate(ctx)
    }
}
