//! Unit tests for warden-sync

use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use warden_acl::{Acl, AssociationRuleTable, AvailableActions, CascadeResolver, CheckContext};
use warden_core::{
    ActionId, FieldMeta, ResourceAction, ResourceWithActions, Result, Role, RoleRepository,
    RoleResource, RoleWithResources, TransactionId, WardenError,
};
use warden_db::MemoryStore;

/// Role repository whose bulk read fails while `failing` is set
struct FlakyRoles {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl RoleRepository for FlakyRoles {
    async fn list_with_resources(&self) -> Result<Vec<RoleWithResources>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WardenError::storage("connection reset"));
        }
        self.inner.list_with_resources().await
    }

    async fn get(&self, name: &str, tx: Option<TransactionId>) -> Result<Option<Role>> {
        self.inner.get(name, tx).await
    }

    async fn clear_default_except(&self, name: &str, tx: Option<TransactionId>) -> Result<u64> {
        self.inner.clear_default_except(name, tx).await
    }
}

/// Role repository whose bulk read parks after reading until released
struct ParkedRoles {
    inner: MemoryStore,
    parked: AtomicBool,
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

#[async_trait]
impl RoleRepository for ParkedRoles {
    async fn list_with_resources(&self) -> Result<Vec<RoleWithResources>> {
        let roles = self.inner.list_with_resources().await?;
        if self.parked.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(roles)
    }

    async fn get(&self, name: &str, tx: Option<TransactionId>) -> Result<Option<Role>> {
        self.inner.get(name, tx).await
    }

    async fn clear_default_except(&self, name: &str, tx: Option<TransactionId>) -> Result<u64> {
        self.inner.clear_default_except(name, tx).await
    }
}

fn resolver() -> CascadeResolver {
    CascadeResolver::new(
        AssociationRuleTable::with_defaults(),
        AvailableActions::default(),
    )
    .unwrap()
}

type MemoryEngine = SyncEngine<MemoryStore, MemoryStore, MemoryStore, MemoryStore>;

fn engine(store: &MemoryStore) -> MemoryEngine {
    let store = Arc::new(store.clone());
    SyncEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        resolver(),
        Acl::new(AvailableActions::default()),
    )
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .define_collection(
            "orders",
            vec![
                FieldMeta::scalar("total"),
                FieldMeta::association("items", "linkTo", "lineItems"),
            ],
        )
        .await;
    store.upsert_role(Role::new("clerk", "Clerk"), None).await.unwrap();

    let resource = RoleResource::new("clerk", "orders");
    let update = ResourceAction::new(resource.id, "update");
    store
        .upsert_resource(
            ResourceWithActions {
                resource,
                actions: vec![update],
            },
            None,
        )
        .await
        .unwrap();
    store
}

// =============================================================================
// Bootstrap Tests
// =============================================================================

#[cfg(test)]
mod bootstrap_tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_builds_registry() {
        let store = seeded_store().await;
        let engine = engine(&store);

        let report = engine.bootstrap().await.unwrap();
        assert_eq!(
            report,
            RebuildReport {
                roles: 1,
                resources: 1,
                explicit_grants: 1,
                derived_grants: 4,
            }
        );

        let ctx = CheckContext::anonymous();
        let acl = engine.acl();
        assert!(acl.check("clerk", "orders.items", "toggle", &ctx).await.unwrap().allowed);
        assert!(acl.check("clerk", "lineItems", "get", &ctx).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_second_bootstrap_rejected() {
        let engine = engine(&seeded_store().await);
        engine.bootstrap().await.unwrap();

        let err = engine.bootstrap().await.unwrap_err();
        assert!(matches!(err, WardenError::SyncError { .. }));
    }

    #[tokio::test]
    async fn test_failed_bootstrap_keeps_gate_closed() {
        let store = seeded_store().await;
        let roles = Arc::new(FlakyRoles {
            inner: store.clone(),
            failing: AtomicBool::new(true),
        });
        let shared = Arc::new(store);
        let engine = SyncEngine::new(
            roles.clone(),
            shared.clone(),
            shared.clone(),
            shared,
            resolver(),
            Acl::new(AvailableActions::default()),
        );

        let err = engine.bootstrap().await.unwrap_err();
        assert!(matches!(err, WardenError::Storage { .. }));
        assert!(!engine.acl().is_ready());
        let err = engine
            .acl()
            .check("clerk", "orders", "update", &CheckContext::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::NotReady));

        roles.failing.store(false, Ordering::SeqCst);
        engine.bootstrap().await.unwrap();
        assert!(engine.acl().is_ready());
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_state() {
        let store = seeded_store().await;
        let roles = Arc::new(FlakyRoles {
            inner: store.clone(),
            failing: AtomicBool::new(false),
        });
        let shared = Arc::new(store);
        let engine = SyncEngine::new(
            roles.clone(),
            shared.clone(),
            shared.clone(),
            shared,
            resolver(),
            Acl::new(AvailableActions::default()),
        );
        engine.bootstrap().await.unwrap();
        let before = engine.acl().effective_grants().await;

        roles.failing.store(true, Ordering::SeqCst);
        assert!(engine.rebuild().await.is_err());
        assert_eq!(engine.acl().effective_grants().await, before);
        assert!(engine.acl().is_ready());
    }
}

// =============================================================================
// Incremental Tests
// =============================================================================

#[cfg(test)]
mod incremental_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_records_are_skipped() {
        let engine = engine(&seeded_store().await);
        engine.bootstrap().await.unwrap();

        let outcomes = vec![
            engine
                .handle(
                    LifecycleEvent::RoleSaved {
                        role_name: "ghost".to_string(),
                    }
                    .into(),
                )
                .await
                .unwrap(),
            engine
                .handle(
                    LifecycleEvent::ResourceSaved {
                        role_name: "clerk".to_string(),
                        resource_name: "invoices".to_string(),
                    }
                    .into(),
                )
                .await
                .unwrap(),
            engine
                .handle(
                    LifecycleEvent::ActionUpdated {
                        action_id: ActionId::new(),
                    }
                    .into(),
                )
                .await
                .unwrap(),
            engine
                .handle(
                    LifecycleEvent::RoleDestroyed {
                        role_name: "ghost".to_string(),
                    }
                    .into(),
                )
                .await
                .unwrap(),
        ];

        assert!(outcomes
            .iter()
            .all(|outcome| matches!(outcome, SyncOutcome::Skipped { .. })));
        assert_eq!(engine.acl().effective_grants().await.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_transaction_surfaces_storage_error() {
        let engine = engine(&seeded_store().await);
        engine.bootstrap().await.unwrap();

        let err = engine
            .handle(LifecycleNotification::within(
                LifecycleEvent::RoleSaved {
                    role_name: "clerk".to_string(),
                },
                TransactionId::new(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_resource_destroyed_revokes_cascades() {
        let store = seeded_store().await;
        let engine = engine(&store);
        engine.bootstrap().await.unwrap();

        store.delete_resource("clerk", "orders", None).await.unwrap();
        let outcome = engine
            .handle(
                LifecycleEvent::ResourceDestroyed {
                    role_name: "clerk".to_string(),
                    resource_name: "orders".to_string(),
                }
                .into(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::Applied { .. }));
        assert!(engine.acl().effective_grants().await.is_empty());
    }
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[cfg(test)]
mod ordering_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_during_rebuild_is_not_overwritten() {
        let store = seeded_store().await;
        let roles = Arc::new(ParkedRoles {
            inner: store.clone(),
            parked: AtomicBool::new(false),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let shared = Arc::new(store.clone());
        let engine = Arc::new(SyncEngine::new(
            roles.clone(),
            shared.clone(),
            shared.clone(),
            shared,
            resolver(),
            Acl::new(AvailableActions::default()),
        ));
        engine.bootstrap().await.unwrap();

        roles.parked.store(true, Ordering::SeqCst);
        let rebuild = tokio::spawn({
            let engine = engine.clone();
            async move { engine.rebuild().await }
        });
        roles.entered.notified().await;

        // written after the rebuild read its records
        let invoices = RoleResource::new("clerk", "invoices");
        let view = ResourceAction::new(invoices.id, "view");
        store
            .upsert_resource(
                ResourceWithActions {
                    resource: invoices,
                    actions: vec![view],
                },
                None,
            )
            .await
            .unwrap();
        let saved = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .handle(
                        LifecycleEvent::ResourceSaved {
                            role_name: "clerk".to_string(),
                            resource_name: "invoices".to_string(),
                        }
                        .into(),
                    )
                    .await
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        roles.release.notify_one();
        rebuild.await.unwrap().unwrap();
        saved.await.unwrap().unwrap();

        let ctx = CheckContext::anonymous();
        assert!(engine
            .acl()
            .check("clerk", "invoices", "view", &ctx)
            .await
            .unwrap()
            .allowed);
    }
}
