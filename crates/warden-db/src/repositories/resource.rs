//! Resource repository implementation

use async_trait::async_trait;
use tracing::instrument;

use warden_core::{
    ResourceId, ResourceRepository, ResourceWithActions, Result, RoleResource, TransactionId,
};

use crate::store::MemoryStore;

#[async_trait]
impl ResourceRepository for MemoryStore {
    #[instrument(skip(self))]
    async fn get_with_actions(
        &self,
        role_name: &str,
        name: &str,
        tx: Option<TransactionId>,
    ) -> Result<Option<ResourceWithActions>> {
        self.read(tx, |state| {
            state
                .find_resource(role_name, name)
                .map(|resource| state.with_actions(resource))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_by_role(
        &self,
        role_name: &str,
        tx: Option<TransactionId>,
    ) -> Result<Vec<ResourceWithActions>> {
        self.read(tx, |state| {
            state
                .resources
                .values()
                .filter(|r| r.role_name == role_name)
                .map(|r| state.with_actions(r))
                .collect()
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_by_collection(
        &self,
        collection: &str,
        tx: Option<TransactionId>,
    ) -> Result<Vec<RoleResource>> {
        self.write(tx, |state| {
            let ids: Vec<ResourceId> = state
                .resources
                .values()
                .filter(|r| r.name == collection)
                .map(|r| r.id)
                .collect();
            Ok(ids
                .into_iter()
                .filter_map(|id| state.remove_resource(id))
                .collect())
        })
        .await
    }
}
