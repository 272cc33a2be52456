//! In-memory role store with unit-of-work staging.
//!
//! Role, resource and action records live in one [`StoreState`]. Writes
//! without a transaction land in the committed state directly. [`begin`]
//! forks the committed state into a pending copy; reads and writes carrying
//! that token see only the copy until [`commit`] publishes it or
//! [`rollback`] drops it. Commits replace the committed state wholesale, so
//! two overlapping transactions resolve as last-commit-wins.
//!
//! Collection metadata is held outside the unit of work: it is the schema
//! provider's data, not the role configuration's.
//!
//! [`begin`]: MemoryStore::begin
//! [`commit`]: MemoryStore::commit
//! [`rollback`]: MemoryStore::rollback

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use warden_core::{
    ActionId, FieldMeta, ResourceAction, ResourceId, ResourceWithActions, Result, Role,
    RoleResource, RoleWithResources, TransactionId, WardenError,
};

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) roles: BTreeMap<String, Role>,
    pub(crate) resources: BTreeMap<ResourceId, RoleResource>,
    pub(crate) actions: BTreeMap<ActionId, ResourceAction>,
}

impl StoreState {
    pub(crate) fn find_resource(&self, role_name: &str, name: &str) -> Option<&RoleResource> {
        self.resources
            .values()
            .find(|r| r.role_name == role_name && r.name == name)
    }

    pub(crate) fn actions_of(&self, resource_id: ResourceId) -> Vec<ResourceAction> {
        self.actions
            .values()
            .filter(|a| a.resource_id == resource_id)
            .cloned()
            .collect()
    }

    pub(crate) fn with_actions(&self, resource: &RoleResource) -> ResourceWithActions {
        ResourceWithActions {
            resource: resource.clone(),
            actions: self.actions_of(resource.id),
        }
    }

    pub(crate) fn role_with_resources(&self, role: &Role) -> RoleWithResources {
        RoleWithResources {
            role: role.clone(),
            resources: self
                .resources
                .values()
                .filter(|r| r.role_name == role.name)
                .map(|r| self.with_actions(r))
                .collect(),
        }
    }

    /// Remove a resource and every action it owns
    pub(crate) fn remove_resource(&mut self, id: ResourceId) -> Option<RoleResource> {
        let removed = self.resources.remove(&id)?;
        self.actions.retain(|_, action| action.resource_id != id);
        Some(removed)
    }
}

/// In-memory implementation of every collaborator trait
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<RwLock<StoreState>>,
    pending: Arc<RwLock<HashMap<TransactionId, StoreState>>>,
    collections: Arc<RwLock<BTreeMap<String, Vec<FieldMeta>>>>,
}

fn unknown_transaction(tx: TransactionId) -> WardenError {
    WardenError::storage(format!("Unknown transaction {}", tx))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        state: StoreState,
        collections: BTreeMap<String, Vec<FieldMeta>>,
    ) -> Self {
        Self {
            committed: Arc::new(RwLock::new(state)),
            pending: Arc::new(RwLock::new(HashMap::new())),
            collections: Arc::new(RwLock::new(collections)),
        }
    }

    // =========================================================================
    // Units of work
    // =========================================================================

    /// Fork the committed state into a new transaction
    pub async fn begin(&self) -> TransactionId {
        let fork = self.committed.read().await.clone();
        let tx = TransactionId::new();
        self.pending.write().await.insert(tx, fork);
        debug!(%tx, "Transaction started");
        tx
    }

    pub async fn commit(&self, tx: TransactionId) -> Result<()> {
        let state = self
            .pending
            .write()
            .await
            .remove(&tx)
            .ok_or_else(|| unknown_transaction(tx))?;
        *self.committed.write().await = state;
        debug!(%tx, "Transaction committed");
        Ok(())
    }

    pub async fn rollback(&self, tx: TransactionId) -> Result<()> {
        self.pending
            .write()
            .await
            .remove(&tx)
            .ok_or_else(|| unknown_transaction(tx))?;
        debug!(%tx, "Transaction rolled back");
        Ok(())
    }

    pub(crate) async fn read<T, F>(&self, tx: Option<TransactionId>, f: F) -> Result<T>
    where
        F: FnOnce(&StoreState) -> T + Send,
        T: Send,
    {
        match tx {
            None => Ok(f(&*self.committed.read().await)),
            Some(tx) => {
                let pending = self.pending.read().await;
                let state = pending.get(&tx).ok_or_else(|| unknown_transaction(tx))?;
                Ok(f(state))
            }
        }
    }

    pub(crate) async fn write<T, F>(&self, tx: Option<TransactionId>, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreState) -> Result<T> + Send,
        T: Send,
    {
        match tx {
            None => f(&mut *self.committed.write().await),
            Some(tx) => {
                let mut pending = self.pending.write().await;
                let state = pending.get_mut(&tx).ok_or_else(|| unknown_transaction(tx))?;
                f(state)
            }
        }
    }

    // =========================================================================
    // Record mutations
    // =========================================================================

    /// Insert or replace a role by name
    #[instrument(skip(self, role), fields(role = %role.name))]
    pub async fn upsert_role(&self, role: Role, tx: Option<TransactionId>) -> Result<()> {
        if role.name.is_empty() {
            return Err(WardenError::invalid_input("Role name must not be empty"));
        }
        self.write(tx, move |state| {
            state.roles.insert(role.name.clone(), role);
            Ok(())
        })
        .await
    }

    /// Delete a role together with its resources and their actions
    #[instrument(skip(self))]
    pub async fn delete_role(&self, name: &str, tx: Option<TransactionId>) -> Result<Option<Role>> {
        self.write(tx, |state| {
            let Some(role) = state.roles.remove(name) else {
                return Ok(None);
            };
            let owned: Vec<ResourceId> = state
                .resources
                .values()
                .filter(|r| r.role_name == name)
                .map(|r| r.id)
                .collect();
            for id in owned {
                state.remove_resource(id);
            }
            Ok(Some(role))
        })
        .await
    }

    /// Insert or replace a resource and its full action list
    ///
    /// A resource already stored under the same (role, collection) pair is
    /// replaced along with all of its actions.
    #[instrument(skip(self, resource), fields(role = %resource.resource.role_name, resource = %resource.resource.name))]
    pub async fn upsert_resource(
        &self,
        resource: ResourceWithActions,
        tx: Option<TransactionId>,
    ) -> Result<()> {
        self.write(tx, move |state| {
            let ResourceWithActions {
                resource,
                actions,
            } = resource;
            if !state.roles.contains_key(&resource.role_name) {
                return Err(WardenError::not_found("role", resource.role_name));
            }
            if let Some(action) = actions.iter().find(|a| a.resource_id != resource.id) {
                return Err(WardenError::invalid_input(format!(
                    "Action {} does not belong to resource {}",
                    action.name, resource.name
                )));
            }

            if let Some(previous) = state
                .find_resource(&resource.role_name, &resource.name)
                .map(|r| r.id)
            {
                state.remove_resource(previous);
            }
            state.remove_resource(resource.id);

            for action in actions {
                state.actions.insert(action.id, action);
            }
            state.resources.insert(resource.id, resource);
            Ok(())
        })
        .await
    }

    /// Delete one resource of a role and its actions
    #[instrument(skip(self))]
    pub async fn delete_resource(
        &self,
        role_name: &str,
        name: &str,
        tx: Option<TransactionId>,
    ) -> Result<Option<RoleResource>> {
        self.write(tx, |state| {
            let id = state.find_resource(role_name, name).map(|r| r.id);
            Ok(id.and_then(|id| state.remove_resource(id)))
        })
        .await
    }

    /// Insert or replace a single action on an existing resource
    #[instrument(skip(self, action), fields(action = %action.name))]
    pub async fn upsert_action(&self, action: ResourceAction, tx: Option<TransactionId>) -> Result<()> {
        self.write(tx, move |state| {
            if !state.resources.contains_key(&action.resource_id) {
                return Err(WardenError::not_found(
                    "resource",
                    action.resource_id.to_string(),
                ));
            }
            state.actions.insert(action.id, action);
            Ok(())
        })
        .await
    }

    pub async fn delete_action(&self, id: ActionId, tx: Option<TransactionId>) -> Result<Option<ResourceAction>> {
        self.write(tx, move |state| Ok(state.actions.remove(&id))).await
    }

    pub async fn roles(&self, tx: Option<TransactionId>) -> Result<Vec<Role>> {
        self.read(tx, |state| state.roles.values().cloned().collect())
            .await
    }

    pub async fn action(&self, id: ActionId, tx: Option<TransactionId>) -> Result<Option<ResourceAction>> {
        self.read(tx, move |state| state.actions.get(&id).cloned()).await
    }

    // =========================================================================
    // Collection metadata
    // =========================================================================

    /// Define (or redefine) a collection's fields
    #[instrument(skip(self, schema))]
    pub async fn define_collection(&self, name: &str, schema: Vec<FieldMeta>) {
        self.collections
            .write()
            .await
            .insert(name.to_string(), schema);
    }

    /// Append a field; an existing field with the same name is replaced
    #[instrument(skip(self, field), fields(field = %field.name))]
    pub async fn create_field(&self, collection: &str, field: FieldMeta) -> Result<()> {
        let mut collections = self.collections.write().await;
        let fields = collections
            .get_mut(collection)
            .ok_or_else(|| WardenError::not_found("collection", collection))?;
        fields.retain(|f| f.name != field.name);
        fields.push(field);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn destroy_field(&self, collection: &str, field: &str) -> Result<Option<FieldMeta>> {
        let mut collections = self.collections.write().await;
        let fields = collections
            .get_mut(collection)
            .ok_or_else(|| WardenError::not_found("collection", collection))?;
        let position = fields.iter().position(|f| f.name == field);
        Ok(position.map(|index| fields.remove(index)))
    }

    #[instrument(skip(self))]
    pub async fn destroy_collection(&self, name: &str) -> Option<Vec<FieldMeta>> {
        self.collections.write().await.remove(name)
    }

    pub(crate) async fn fields_of(&self, collection: &str) -> Vec<FieldMeta> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}
