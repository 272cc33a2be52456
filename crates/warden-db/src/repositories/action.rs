//! Action repository implementation

use async_trait::async_trait;
use tracing::instrument;

use warden_core::{
    ActionId, ActionRepository, ResourceAction, Result, RoleResource, TransactionId, WardenError,
};

use crate::store::MemoryStore;

#[async_trait]
impl ActionRepository for MemoryStore {
    #[instrument(skip(self))]
    async fn get_with_resource(
        &self,
        id: ActionId,
        tx: Option<TransactionId>,
    ) -> Result<Option<(RoleResource, ResourceAction)>> {
        self.read(tx, move |state| {
            let action = state.actions.get(&id)?;
            let resource = state.resources.get(&action.resource_id)?;
            Some((resource.clone(), action.clone()))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn find_by_collection(
        &self,
        collection: &str,
        tx: Option<TransactionId>,
    ) -> Result<Vec<(RoleResource, ResourceAction)>> {
        self.read(tx, |state| {
            state
                .resources
                .values()
                .filter(|r| r.name == collection)
                .flat_map(|r| {
                    state
                        .actions_of(r.id)
                        .into_iter()
                        .map(move |action| (r.clone(), action))
                })
                .collect()
        })
        .await
    }

    #[instrument(skip(self, names))]
    async fn update_fields(
        &self,
        id: ActionId,
        names: &[String],
        tx: Option<TransactionId>,
    ) -> Result<()> {
        let fields = names.to_vec();
        self.write(tx, move |state| {
            let action = state
                .actions
                .get_mut(&id)
                .ok_or_else(|| WardenError::not_found("action", id.to_prefixed()))?;
            action.fields = fields;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: ActionId, tx: Option<TransactionId>) -> Result<bool> {
        Ok(self.delete_action(id, tx).await?.is_some())
    }
}
