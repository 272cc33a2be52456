//! Lifecycle notifications emitted by the persisted-record repository

use serde::{Deserialize, Serialize};
use std::fmt;

use warden_core::{ActionId, Result, TransactionId, WardenError};

/// The closed set of record transitions the engine reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A role was created or updated, nested resources included
    RoleSaved { role_name: String },
    RoleDestroyed { role_name: String },
    /// A resource was created or updated, nested actions included
    ResourceSaved {
        role_name: String,
        resource_name: String,
    },
    ResourceDestroyed {
        role_name: String,
        resource_name: String,
    },
    ActionUpdated { action_id: ActionId },
    FieldCreated {
        collection_name: String,
        field_name: String,
    },
    FieldDestroyed {
        collection_name: String,
        field_name: String,
    },
    CollectionDestroyed { collection_name: String },
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::RoleSaved { .. } => "role_saved",
            LifecycleEvent::RoleDestroyed { .. } => "role_destroyed",
            LifecycleEvent::ResourceSaved { .. } => "resource_saved",
            LifecycleEvent::ResourceDestroyed { .. } => "resource_destroyed",
            LifecycleEvent::ActionUpdated { .. } => "action_updated",
            LifecycleEvent::FieldCreated { .. } => "field_created",
            LifecycleEvent::FieldDestroyed { .. } => "field_destroyed",
            LifecycleEvent::CollectionDestroyed { .. } => "collection_destroyed",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::RoleSaved { role_name } | LifecycleEvent::RoleDestroyed { role_name } => {
                write!(f, "{} {}", self.kind(), role_name)
            }
            LifecycleEvent::ResourceSaved {
                role_name,
                resource_name,
            }
            | LifecycleEvent::ResourceDestroyed {
                role_name,
                resource_name,
            } => write!(f, "{} {}:{}", self.kind(), role_name, resource_name),
            LifecycleEvent::ActionUpdated { action_id } => {
                write!(f, "{} {}", self.kind(), action_id.to_prefixed())
            }
            LifecycleEvent::FieldCreated {
                collection_name,
                field_name,
            }
            | LifecycleEvent::FieldDestroyed {
                collection_name,
                field_name,
            } => write!(f, "{} {}.{}", self.kind(), collection_name, field_name),
            LifecycleEvent::CollectionDestroyed { collection_name } => {
                write!(f, "{} {}", self.kind(), collection_name)
            }
        }
    }
}

/// An event plus the unit of work it happened in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleNotification {
    #[serde(flatten)]
    pub event: LifecycleEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionId>,
}

impl LifecycleNotification {
    pub fn new(event: LifecycleEvent) -> Self {
        Self {
            event,
            transaction: None,
        }
    }

    pub fn within(event: LifecycleEvent, transaction: TransactionId) -> Self {
        Self {
            event,
            transaction: Some(transaction),
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| WardenError::invalid_input(format!("Invalid lifecycle notification: {}", e)))
    }
}

impl From<LifecycleEvent> for LifecycleNotification {
    fn from(event: LifecycleEvent) -> Self {
        Self::new(event)
    }
}
