//! Role repository implementation

use async_trait::async_trait;
use tracing::instrument;

use warden_core::{Result, Role, RoleRepository, RoleWithResources, TransactionId};

use crate::store::MemoryStore;

#[async_trait]
impl RoleRepository for MemoryStore {
    #[instrument(skip(self))]
    async fn list_with_resources(&self) -> Result<Vec<RoleWithResources>> {
        self.read(None, |state| {
            state
                .roles
                .values()
                .map(|role| state.role_with_resources(role))
                .collect()
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get(&self, name: &str, tx: Option<TransactionId>) -> Result<Option<Role>> {
        self.read(tx, |state| state.roles.get(name).cloned()).await
    }

    #[instrument(skip(self))]
    async fn clear_default_except(&self, name: &str, tx: Option<TransactionId>) -> Result<u64> {
        self.write(tx, |state| {
            let mut changed = 0;
            for role in state.roles.values_mut() {
                if role.name != name && role.default {
                    role.default = false;
                    role.updated_at = chrono::Utc::now();
                    changed += 1;
                }
            }
            Ok(changed)
        })
        .await
    }
}
