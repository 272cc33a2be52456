//! Shared handle over the process-wide registry.
//!
//! Readers take the read lock for one check. Every mutation (an incremental
//! update, or the install of a freshly rebuilt registry) happens inside a
//! single write-lock section, so a check sees either the state before or the
//! state after, never a mix.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use warden_core::{Result, WardenError};

use crate::grant_table::{Grant, GrantKey};
use crate::registry::{Decision, PermissionRegistry};
use crate::rules::AvailableActions;
use crate::skip::{CheckContext, SkipRule};

#[derive(Debug, Clone)]
pub struct Acl {
    registry: Arc<RwLock<PermissionRegistry>>,
    ready: Arc<AtomicBool>,
}

impl Acl {
    /// Empty, not-ready handle
    pub fn new(available: AvailableActions) -> Self {
        Self {
            registry: Arc::new(RwLock::new(PermissionRegistry::new(available))),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `false` until the first full rebuild has been installed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub async fn check(
        &self,
        role: &str,
        resource: &str,
        action: &str,
        ctx: &CheckContext,
    ) -> Result<Decision> {
        if !self.is_ready() {
            return Err(WardenError::NotReady);
        }
        let registry = self.registry.read().await;
        Ok(registry.check(role, resource, action, ctx))
    }

    /// Register a skip rule; rules keep registration order
    pub async fn skip(&self, rule: SkipRule) {
        self.registry.write().await.add_skip_rule(rule);
    }

    /// Swap in the grant state of a fully built registry and open the gate
    pub async fn install(&self, fresh: PermissionRegistry) {
        let mut registry = self.registry.write().await;
        registry.replace_state(fresh);
        self.ready.store(true, Ordering::Release);
        info!(grants = registry.effective_grants().len(), "Permission registry installed");
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, PermissionRegistry> {
        self.registry.read().await
    }

    /// Exclusive access for one incremental update
    pub async fn write(&self) -> RwLockWriteGuard<'_, PermissionRegistry> {
        self.registry.write().await
    }

    pub async fn effective_grants(&self) -> BTreeMap<GrantKey, Grant> {
        self.registry.read().await.effective_grants()
    }
}
