//! Registry maintenance: full rebuild at startup and incremental updates
//! driven by lifecycle notifications.
//!
//! Every handler performs its repository and schema reads (and the few
//! record writes it owns) first, computes its [`RegistryChange`]s with the
//! [`CascadeResolver`], and only then publishes them. Changes from a
//! notification without a transaction are applied at once in one write-lock
//! section. Changes from a notification inside a unit of work are staged
//! under its token and applied by [`SyncEngine::commit`], or dropped by
//! [`SyncEngine::rollback`].
//!
//! Handlers, commits and rebuilds are serialized against each other, so a
//! rebuild never installs over an update applied while it was reading.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use warden_acl::{Acl, CascadeResolver, PermissionRegistry, RegistryChange, ResourcePlan};
use warden_core::{
    ActionId, ActionRepository, FieldMeta, ResourceAction, ResourceRepository,
    ResourceWithActions, Result, RoleRepository, RoleResource, SchemaProvider, TransactionId,
    UnitOfWork, WardenError,
};

use crate::events::{LifecycleEvent, LifecycleNotification};

/// Counts from one full rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub roles: usize,
    pub resources: usize,
    pub explicit_grants: usize,
    pub derived_grants: usize,
}

/// What an incremental update did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Applied {
        /// Resource and action plans written to the registry
        plans: usize,
        /// Persisted action field lists rewritten
        rewritten: usize,
    },
    /// Computed inside a unit of work; published when it commits
    Staged {
        transaction: TransactionId,
        plans: usize,
        rewritten: usize,
    },
    /// The referenced record is gone; a later destroy event cleans up
    Skipped { reason: String },
}

impl SyncOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        SyncOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

pub struct SyncEngine<R, P, A, S>
where
    R: RoleRepository,
    P: ResourceRepository,
    A: ActionRepository,
    S: SchemaProvider,
{
    roles: Arc<R>,
    resources: Arc<P>,
    actions: Arc<A>,
    schema: Arc<S>,
    resolver: CascadeResolver,
    acl: Acl,
    bootstrapped: Mutex<bool>,
    updates: Mutex<()>,
    staged: Mutex<HashMap<TransactionId, Vec<RegistryChange>>>,
}

impl<R, P, A, S> SyncEngine<R, P, A, S>
where
    R: RoleRepository + 'static,
    P: ResourceRepository + 'static,
    A: ActionRepository + 'static,
    S: SchemaProvider + 'static,
{
    pub fn new(
        roles: Arc<R>,
        resources: Arc<P>,
        actions: Arc<A>,
        schema: Arc<S>,
        resolver: CascadeResolver,
        acl: Acl,
    ) -> Self {
        Self {
            roles,
            resources,
            actions,
            schema,
            resolver,
            acl,
            bootstrapped: Mutex::new(false),
            updates: Mutex::new(()),
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    pub fn resolver(&self) -> &CascadeResolver {
        &self.resolver
    }

    // =========================================================================
    // Full rebuild
    // =========================================================================

    /// Run the startup rebuild; succeeds at most once per engine
    ///
    /// A failed attempt leaves the handle not ready and may be retried.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<RebuildReport> {
        let mut bootstrapped = self.bootstrapped.lock().await;
        if *bootstrapped {
            return Err(WardenError::sync_error("Registry has already been bootstrapped"));
        }

        match self.rebuild().await {
            Ok(report) => {
                *bootstrapped = true;
                Ok(report)
            }
            Err(e) => {
                error!("Bootstrap rebuild failed: {}", e);
                Err(e)
            }
        }
    }

    /// Rebuild the whole registry from persisted records
    ///
    /// The new state is built off the registry lock and swapped in only when
    /// every read succeeded. Handlers and commits wait for it to finish.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let _updates = self.updates.lock().await;
        let roles = self.roles.list_with_resources().await?;
        let mut registry = PermissionRegistry::new(self.resolver.available_actions().clone());
        let mut report = RebuildReport::default();

        for entry in &roles {
            registry.define_role(&entry.role.name, entry.role.strategy.clone());
            report.roles += 1;

            for plan in self.plan_resources(&entry.resources).await? {
                report.resources += 1;
                report.explicit_grants += plan.explicit.len();
                report.derived_grants += plan.derived.len();
                registry.apply_resource_plan(&plan);
            }
        }

        self.acl.install(registry).await;
        info!(
            roles = report.roles,
            resources = report.resources,
            explicit = report.explicit_grants,
            derived = report.derived_grants,
            "Permission registry rebuilt"
        );
        Ok(report)
    }

    async fn plan_resources(&self, resources: &[ResourceWithActions]) -> Result<Vec<ResourcePlan>> {
        let mut schema: HashMap<String, Vec<FieldMeta>> = HashMap::new();
        let mut plans = Vec::with_capacity(resources.len());

        for resource in resources {
            let collection = &resource.resource.name;
            if !schema.contains_key(collection) {
                let fields = self.schema.collection_fields(collection).await?;
                schema.insert(collection.clone(), fields);
            }
            let fields = schema.get(collection).map(Vec::as_slice).unwrap_or_default();
            plans.push(self.resolver.plan_resource(resource, fields));
        }
        Ok(plans)
    }

    // =========================================================================
    // Units of work
    // =========================================================================

    /// Commit `tx` in the store, then apply every change staged under it
    ///
    /// A failed commit drops the staged changes with it.
    #[instrument(skip(self, store))]
    pub async fn commit<U>(&self, store: &U, tx: TransactionId) -> Result<usize>
    where
        U: UnitOfWork + ?Sized,
    {
        let _updates = self.updates.lock().await;
        let changes = self.staged.lock().await.remove(&tx).unwrap_or_default();
        if let Err(e) = store.commit(tx).await {
            error!(discarded = changes.len(), "Commit failed: {}", e);
            return Err(e);
        }

        self.apply(&changes).await;
        info!(changes = changes.len(), "Staged registry changes applied");
        Ok(changes.len())
    }

    /// Roll `tx` back in the store and drop what was staged under it
    #[instrument(skip(self, store))]
    pub async fn rollback<U>(&self, store: &U, tx: TransactionId) -> Result<usize>
    where
        U: UnitOfWork + ?Sized,
    {
        let discarded = self
            .staged
            .lock()
            .await
            .remove(&tx)
            .map(|changes| changes.len())
            .unwrap_or(0);
        store.rollback(tx).await?;
        debug!(discarded, "Staged registry changes discarded");
        Ok(discarded)
    }

    /// Number of changes waiting on `tx`
    pub async fn staged_changes(&self, tx: TransactionId) -> usize {
        self.staged.lock().await.get(&tx).map_or(0, Vec::len)
    }

    async fn apply(&self, changes: &[RegistryChange]) {
        let mut registry = self.acl.write().await;
        for change in changes {
            registry.apply(change);
        }
    }

    /// Apply now, or stage under the notification's unit of work
    async fn publish(
        &self,
        tx: Option<TransactionId>,
        changes: Vec<RegistryChange>,
        plans: usize,
        rewritten: usize,
    ) -> SyncOutcome {
        match tx {
            None => {
                self.apply(&changes).await;
                SyncOutcome::Applied { plans, rewritten }
            }
            Some(tx) => {
                self.staged
                    .lock()
                    .await
                    .entry(tx)
                    .or_default()
                    .extend(changes);
                SyncOutcome::Staged {
                    transaction: tx,
                    plans,
                    rewritten,
                }
            }
        }
    }

    // =========================================================================
    // Incremental updates
    // =========================================================================

    /// Dispatch one notification to its handler
    #[instrument(skip(self, notification), fields(event = %notification.event))]
    pub async fn handle(&self, notification: LifecycleNotification) -> Result<SyncOutcome> {
        let tx = notification.transaction;
        let outcome = match &notification.event {
            LifecycleEvent::RoleSaved { role_name } => self.on_role_saved(role_name, tx).await,
            LifecycleEvent::RoleDestroyed { role_name } => {
                self.on_role_destroyed(role_name, tx).await
            }
            LifecycleEvent::ResourceSaved {
                role_name,
                resource_name,
            } => self.on_resource_saved(role_name, resource_name, tx).await,
            LifecycleEvent::ResourceDestroyed {
                role_name,
                resource_name,
            } => self.on_resource_destroyed(role_name, resource_name, tx).await,
            LifecycleEvent::ActionUpdated { action_id } => {
                self.on_action_updated(*action_id, tx).await
            }
            LifecycleEvent::FieldCreated {
                collection_name,
                field_name,
            } => self.on_field_created(collection_name, field_name, tx).await,
            LifecycleEvent::FieldDestroyed {
                collection_name,
                field_name,
            } => self.on_field_destroyed(collection_name, field_name, tx).await,
            LifecycleEvent::CollectionDestroyed { collection_name } => {
                self.on_collection_destroyed(collection_name, tx).await
            }
        };

        match &outcome {
            Ok(SyncOutcome::Skipped { reason }) => {
                debug!("Skipped {}: {}", notification.event, reason)
            }
            Ok(_) => {}
            Err(e) => error!("Failed to apply {}: {}", notification.event, e),
        }
        outcome
    }

    /// Replace the role's subtree; a default role clears every other default
    #[instrument(skip(self))]
    pub async fn on_role_saved(
        &self,
        role_name: &str,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        let Some(role) = self.roles.get(role_name, tx).await? else {
            return Ok(SyncOutcome::skipped(format!("role {} no longer exists", role_name)));
        };

        if role.default {
            let cleared = self.roles.clear_default_except(role_name, tx).await?;
            if cleared > 0 {
                info!(cleared, "Cleared default flag on other roles");
            }
        }

        let resources = self.resources.list_by_role(role_name, tx).await?;
        let plans = self.plan_resources(&resources).await?;
        let count = plans.len();

        let mut changes = vec![
            RegistryChange::RemoveRole {
                role: role_name.to_string(),
            },
            RegistryChange::DefineRole {
                role: role_name.to_string(),
                strategy: role.strategy.clone(),
            },
        ];
        changes.extend(plans.into_iter().map(RegistryChange::ApplyResource));

        info!(resources = count, "Role written to registry");
        Ok(self.publish(tx, changes, count, 0).await)
    }

    #[instrument(skip(self))]
    pub async fn on_role_destroyed(
        &self,
        role_name: &str,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        // a role created earlier in the same unit of work is only staged
        if tx.is_none() && !self.acl.read().await.has_role(role_name) {
            return Ok(SyncOutcome::skipped(format!("role {} not in registry", role_name)));
        }

        let change = RegistryChange::RemoveRole {
            role: role_name.to_string(),
        };
        info!("Role removed from registry");
        Ok(self.publish(tx, vec![change], 0, 0).await)
    }

    /// Re-derive one resource, superseding what it contributed before
    #[instrument(skip(self))]
    pub async fn on_resource_saved(
        &self,
        role_name: &str,
        resource_name: &str,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        let Some(resource) = self
            .resources
            .get_with_actions(role_name, resource_name, tx)
            .await?
        else {
            return Ok(SyncOutcome::skipped(format!(
                "resource {}:{} no longer exists",
                role_name, resource_name
            )));
        };

        let fields = self.schema.collection_fields(resource_name).await?;
        let plan = self.resolver.plan_resource(&resource, &fields);
        info!(
            explicit = plan.explicit.len(),
            derived = plan.derived.len(),
            "Resource written to registry"
        );
        Ok(self
            .publish(tx, vec![RegistryChange::ApplyResource(plan)], 1, 0)
            .await)
    }

    #[instrument(skip(self))]
    pub async fn on_resource_destroyed(
        &self,
        role_name: &str,
        resource_name: &str,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        let change = RegistryChange::RevokeResource {
            role: role_name.to_string(),
            resource: resource_name.to_string(),
        };
        info!("Resource revoked");
        Ok(self.publish(tx, vec![change], 0, 0).await)
    }

    /// Re-resolve a single action's grant and cascades
    #[instrument(skip(self))]
    pub async fn on_action_updated(
        &self,
        action_id: ActionId,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        let Some((resource, action)) = self.actions.get_with_resource(action_id, tx).await? else {
            return Ok(SyncOutcome::skipped(format!(
                "action {} no longer exists",
                action_id.to_prefixed()
            )));
        };

        let fields = self.schema.collection_fields(&resource.name).await?;
        let plan = self.resolver.plan_action(&resource, &action, &fields);
        info!(action = %action.name, derived = plan.derived.len(), "Action written to registry");
        Ok(self
            .publish(tx, vec![RegistryChange::ApplyAction(plan)], 1, 0)
            .await)
    }

    /// Append the new field to every restricted field list on the collection
    ///
    /// Actions with an empty list already cover every field; they are only
    /// re-planned, since the new field may add cascades.
    #[instrument(skip(self))]
    pub async fn on_field_created(
        &self,
        collection: &str,
        field: &str,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        let affected = self.actions.find_by_collection(collection, tx).await?;

        let mut rewritten = 0;
        let mut replan = Vec::with_capacity(affected.len());
        for (resource, mut action) in affected {
            if !action.fields.is_empty() {
                if action.fields.iter().any(|name| name == field) {
                    continue;
                }
                action.fields.push(field.to_string());
                self.actions
                    .update_fields(action.id, &action.fields, tx)
                    .await?;
                rewritten += 1;
            }
            replan.push((resource, action));
        }

        self.publish_action_plans(collection, replan, Vec::new(), rewritten, tx)
            .await
    }

    /// Drop the field from every field list that names it
    ///
    /// An action whose only field was removed is deleted and revoked; an
    /// empty list would otherwise read as every field.
    #[instrument(skip(self))]
    pub async fn on_field_destroyed(
        &self,
        collection: &str,
        field: &str,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        let affected = self.actions.find_by_collection(collection, tx).await?;

        let mut rewritten = 0;
        let mut replan = Vec::with_capacity(affected.len());
        let mut revoked = Vec::new();
        for (resource, mut action) in affected {
            if action.fields.iter().any(|name| name == field) {
                action.fields.retain(|name| name != field);
                rewritten += 1;
                if action.fields.is_empty() {
                    self.actions.delete(action.id, tx).await?;
                    warn!(
                        action = %action.name,
                        resource = %resource.name,
                        "Last permitted field removed; action revoked"
                    );
                    revoked.push(RegistryChange::RevokeAction {
                        role: resource.role_name.clone(),
                        resource: resource.name.clone(),
                        action: action.name.clone(),
                    });
                    continue;
                }
                self.actions
                    .update_fields(action.id, &action.fields, tx)
                    .await?;
            } else if !action.fields.is_empty() {
                continue;
            }
            replan.push((resource, action));
        }

        self.publish_action_plans(collection, replan, revoked, rewritten, tx)
            .await
    }

    async fn publish_action_plans(
        &self,
        collection: &str,
        actions: Vec<(RoleResource, ResourceAction)>,
        mut changes: Vec<RegistryChange>,
        rewritten: usize,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let fields = self.schema.collection_fields(collection).await?;
        let plans = actions.len() + changes.len();
        changes.extend(actions.iter().map(|(resource, action)| {
            RegistryChange::ApplyAction(self.resolver.plan_action(resource, action, &fields))
        }));

        info!(plans, rewritten, "Field change applied");
        Ok(self.publish(tx, changes, plans, rewritten).await)
    }

    /// Destroy every resource named after the collection and revoke it
    #[instrument(skip(self))]
    pub async fn on_collection_destroyed(
        &self,
        collection: &str,
        tx: Option<TransactionId>,
    ) -> Result<SyncOutcome> {
        let _updates = self.updates.lock().await;
        let removed = self.resources.delete_by_collection(collection, tx).await?;
        let changes: Vec<RegistryChange> = removed
            .iter()
            .map(|resource| RegistryChange::RevokeResource {
                role: resource.role_name.clone(),
                resource: resource.name.clone(),
            })
            .collect();

        info!(resources = removed.len(), "Collection resources revoked");
        Ok(self.publish(tx, changes, removed.len(), 0).await)
    }
}
