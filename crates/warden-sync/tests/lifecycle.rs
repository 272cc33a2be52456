//! End-to-end lifecycle scenarios against the in-memory store

use std::sync::Arc;

use warden_acl::{
    Acl, AssociationRuleTable, AvailableActions, CascadeResolver, CheckContext, DecisionReason,
};
use warden_core::{
    ActionRepository, FieldMeta, ResourceAction, ResourceWithActions, Role, RoleRepository,
    RoleResource, RoleStrategy,
};
use warden_db::{MemoryStore, StoreSnapshot};
use warden_sync::{LifecycleEvent, LifecycleNotification, SyncEngine, SyncOutcome};

type Engine = SyncEngine<MemoryStore, MemoryStore, MemoryStore, MemoryStore>;

fn engine_for(store: &MemoryStore) -> Engine {
    let store = Arc::new(store.clone());
    let resolver = CascadeResolver::new(
        AssociationRuleTable::with_defaults(),
        AvailableActions::default(),
    )
    .unwrap();
    SyncEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        resolver,
        Acl::new(AvailableActions::default()),
    )
}

async fn orders_store() -> MemoryStore {
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
    store
        .define_collection("lineItems", vec![FieldMeta::scalar("sku")])
        .await;
    store
        .upsert_role(Role::new("roleX", "Role X"), None)
        .await
        .unwrap();
    store
}

async fn save_resource(store: &MemoryStore, resource: RoleResource, actions: Vec<ResourceAction>) {
    store
        .upsert_resource(ResourceWithActions { resource, actions }, None)
        .await
        .unwrap();
}

fn ctx() -> CheckContext {
    CheckContext::anonymous()
}

#[tokio::test]
async fn test_field_lifecycle_rewrites_field_lists() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    let update = ResourceAction::new(resource.id, "update").with_fields(["total"]);
    let view = ResourceAction::new(resource.id, "view");
    save_resource(&store, resource, vec![update.clone(), view.clone()]).await;

    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    // notes joins the schema
    store
        .create_field("orders", FieldMeta::scalar("notes"))
        .await
        .unwrap();
    let outcome = engine
        .handle(
            LifecycleEvent::FieldCreated {
                collection_name: "orders".to_string(),
                field_name: "notes".to_string(),
            }
            .into(),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Applied {
            plans: 2,
            rewritten: 1
        }
    );

    let stored = store.action(update.id, None).await.unwrap().unwrap();
    assert_eq!(stored.fields, vec!["total", "notes"]);
    assert!(store.action(view.id, None).await.unwrap().unwrap().fields.is_empty());

    let decision = engine
        .acl()
        .check("roleX", "orders", "update", &ctx())
        .await
        .unwrap();
    assert_eq!(decision.fields.unwrap().len(), 2);

    // total leaves the schema
    store.destroy_field("orders", "total").await.unwrap();
    engine
        .handle(
            LifecycleEvent::FieldDestroyed {
                collection_name: "orders".to_string(),
                field_name: "total".to_string(),
            }
            .into(),
        )
        .await
        .unwrap();

    let stored = store.action(update.id, None).await.unwrap().unwrap();
    assert_eq!(stored.fields, vec!["notes"]);
    let decision = engine
        .acl()
        .check("roleX", "orders", "update", &ctx())
        .await
        .unwrap();
    assert_eq!(
        decision.fields.unwrap().into_iter().collect::<Vec<_>>(),
        vec!["notes"]
    );
}

#[tokio::test]
async fn test_removing_only_permitted_field_revokes_action() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    let update = ResourceAction::new(resource.id, "update").with_fields(["total"]);
    let view = ResourceAction::new(resource.id, "view");
    save_resource(&store, resource, vec![update.clone(), view.clone()]).await;

    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();
    let before = engine.acl().effective_grants().await;

    store.destroy_field("orders", "total").await.unwrap();
    let outcome = engine
        .handle(
            LifecycleEvent::FieldDestroyed {
                collection_name: "orders".to_string(),
                field_name: "total".to_string(),
            }
            .into(),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Applied {
            plans: 2,
            rewritten: 1
        }
    );

    assert!(store.action(update.id, None).await.unwrap().is_none());
    assert!(store.action(view.id, None).await.unwrap().is_some());

    let acl = engine.acl();
    let decision = acl.check("roleX", "orders", "update", &ctx()).await.unwrap();
    assert_eq!(decision.reason, DecisionReason::Denied);
    for (resource, action) in [
        ("orders.items", "add"),
        ("orders.items", "remove"),
        ("orders.items", "toggle"),
        ("lineItems", "view"),
    ] {
        assert!(
            !acl.check("roleX", resource, action, &ctx()).await.unwrap().allowed,
            "{}:{} must not appear",
            resource,
            action
        );
    }

    // the grant set only shrank
    let after = acl.effective_grants().await;
    assert!(after.keys().all(|key| before.contains_key(key)));
    assert!(after.len() < before.len());
}

#[tokio::test]
async fn test_rolled_back_field_change_leaves_registry() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    let update = ResourceAction::new(resource.id, "update").with_fields(["total"]);
    save_resource(&store, resource, vec![update.clone()]).await;

    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let tx = store.begin().await;
    store
        .create_field("orders", FieldMeta::scalar("notes"))
        .await
        .unwrap();
    let outcome = engine
        .handle(LifecycleNotification::within(
            LifecycleEvent::FieldCreated {
                collection_name: "orders".to_string(),
                field_name: "notes".to_string(),
            },
            tx,
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Staged { .. }));
    assert_eq!(engine.staged_changes(tx).await, 1);

    assert_eq!(engine.rollback(&store, tx).await.unwrap(), 1);
    assert_eq!(engine.staged_changes(tx).await, 0);

    let stored = store.action(update.id, None).await.unwrap().unwrap();
    assert_eq!(stored.fields, vec!["total"]);
    let decision = engine
        .acl()
        .check("roleX", "orders", "update", &ctx())
        .await
        .unwrap();
    assert_eq!(
        decision.fields.unwrap().into_iter().collect::<Vec<_>>(),
        vec!["total"]
    );
}

#[tokio::test]
async fn test_committed_field_change_publishes_together() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    let update = ResourceAction::new(resource.id, "update").with_fields(["total"]);
    save_resource(&store, resource, vec![update.clone()]).await;

    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let tx = store.begin().await;
    store
        .create_field("orders", FieldMeta::scalar("notes"))
        .await
        .unwrap();
    engine
        .handle(LifecycleNotification::within(
            LifecycleEvent::FieldCreated {
                collection_name: "orders".to_string(),
                field_name: "notes".to_string(),
            },
            tx,
        ))
        .await
        .unwrap();

    // neither side is visible before commit
    let committed = store.action(update.id, None).await.unwrap().unwrap();
    assert_eq!(committed.fields, vec!["total"]);
    let decision = engine
        .acl()
        .check("roleX", "orders", "update", &ctx())
        .await
        .unwrap();
    assert_eq!(decision.fields.unwrap().len(), 1);

    engine.commit(&store, tx).await.unwrap();

    let committed = store.action(update.id, None).await.unwrap().unwrap();
    assert_eq!(committed.fields, vec!["total", "notes"]);
    let decision = engine
        .acl()
        .check("roleX", "orders", "update", &ctx())
        .await
        .unwrap();
    assert_eq!(decision.fields.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_commit_drops_staged_changes() {
    let store = orders_store().await;
    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let tx = store.begin().await;
    store
        .upsert_role(Role::new("b", "B"), Some(tx))
        .await
        .unwrap();
    engine
        .handle(LifecycleNotification::within(
            LifecycleEvent::RoleSaved {
                role_name: "b".to_string(),
            },
            tx,
        ))
        .await
        .unwrap();

    // the store forgets the transaction before the engine commits it
    store.rollback(tx).await.unwrap();
    assert!(engine.commit(&store, tx).await.is_err());
    assert_eq!(engine.staged_changes(tx).await, 0);
    assert!(!engine.acl().read().await.has_role("b"));
}

#[tokio::test]
async fn test_new_association_field_cascades_for_all_field_actions() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    let update = ResourceAction::new(resource.id, "update");
    save_resource(&store, resource, vec![update]).await;
    store
        .define_collection("attachments", vec![FieldMeta::scalar("url")])
        .await;

    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();
    assert!(!engine
        .acl()
        .check("roleX", "orders.files", "upload", &ctx())
        .await
        .unwrap()
        .allowed);

    store
        .create_field(
            "orders",
            FieldMeta::association("files", "attachments", "attachments"),
        )
        .await
        .unwrap();
    engine
        .handle(
            LifecycleEvent::FieldCreated {
                collection_name: "orders".to_string(),
                field_name: "files".to_string(),
            }
            .into(),
        )
        .await
        .unwrap();

    // attachments.update grants update/add/remove/toggle on the edge
    let acl = engine.acl();
    assert!(acl.check("roleX", "orders.files", "toggle", &ctx()).await.unwrap().allowed);
    assert!(!acl.check("roleX", "orders.files", "upload", &ctx()).await.unwrap().allowed);
}

#[tokio::test]
async fn test_cascade_example_through_resource_saved() {
    let store = orders_store().await;
    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let resource = RoleResource::new("roleX", "orders");
    let update = ResourceAction::new(resource.id, "update");
    save_resource(&store, resource, vec![update]).await;
    engine
        .handle(
            LifecycleEvent::ResourceSaved {
                role_name: "roleX".to_string(),
                resource_name: "orders".to_string(),
            }
            .into(),
        )
        .await
        .unwrap();

    let acl = engine.acl();
    for (resource, action) in [
        ("orders.items", "add"),
        ("orders.items", "remove"),
        ("orders.items", "toggle"),
        ("lineItems", "view"),
    ] {
        assert!(
            acl.check("roleX", resource, action, &ctx()).await.unwrap().allowed,
            "{}:{} should be derived",
            resource,
            action
        );
    }
    assert!(!acl.check("roleX", "lineItems", "update", &ctx()).await.unwrap().allowed);
}

#[tokio::test]
async fn test_action_update_leaves_siblings() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    let create = ResourceAction::new(resource.id, "create");
    let update = ResourceAction::new(resource.id, "update");
    save_resource(&store, resource.clone(), vec![create, update.clone()]).await;

    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let narrowed = update.clone().with_fields(["total"]);
    store.upsert_action(narrowed, None).await.unwrap();
    engine
        .handle(
            LifecycleEvent::ActionUpdated {
                action_id: update.id,
            }
            .into(),
        )
        .await
        .unwrap();

    let acl = engine.acl();
    assert!(!acl.check("roleX", "orders.items", "remove", &ctx()).await.unwrap().allowed);
    assert!(acl.check("roleX", "orders.items", "add", &ctx()).await.unwrap().allowed);
    assert!(acl.check("roleX", "orders", "create", &ctx()).await.unwrap().allowed);
}

#[tokio::test]
async fn test_single_default_role_within_transaction() {
    let store = orders_store().await;
    store
        .upsert_role(Role::new("a", "A").as_default(), None)
        .await
        .unwrap();
    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let tx = store.begin().await;
    store
        .upsert_role(Role::new("b", "B").as_default(), Some(tx))
        .await
        .unwrap();
    engine
        .handle(LifecycleNotification::within(
            LifecycleEvent::RoleSaved {
                role_name: "b".to_string(),
            },
            tx,
        ))
        .await
        .unwrap();

    // nothing leaks before commit
    assert!(store.get("a", None).await.unwrap().unwrap().default);
    assert!(!engine.acl().read().await.has_role("b"));
    engine.commit(&store, tx).await.unwrap();
    assert!(engine.acl().read().await.has_role("b"));

    let defaults: Vec<String> = store
        .roles(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|role| role.default)
        .map(|role| role.name)
        .collect();
    assert_eq!(defaults, vec!["b"]);
}

#[tokio::test]
async fn test_role_saved_replaces_subtree_and_strategy() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    save_resource(
        &store,
        resource.clone(),
        vec![ResourceAction::new(resource.id, "update")],
    )
    .await;
    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    store.delete_resource("roleX", "orders", None).await.unwrap();
    store
        .upsert_role(
            Role::new("roleX", "Role X").with_strategy(RoleStrategy::new(["view", "update:own"])),
            None,
        )
        .await
        .unwrap();
    engine
        .handle(
            LifecycleEvent::RoleSaved {
                role_name: "roleX".to_string(),
            }
            .into(),
        )
        .await
        .unwrap();

    let acl = engine.acl();
    assert!(acl.effective_grants().await.is_empty());
    let decision = acl.check("roleX", "invoices", "update", &ctx()).await.unwrap();
    assert_eq!(decision.reason, DecisionReason::Strategy);
    assert_eq!(decision.scope, Some(serde_json::json!("own")));
    assert!(!acl.check("roleX", "invoices", "destroy", &ctx()).await.unwrap().allowed);
}

#[tokio::test]
async fn test_resource_without_actions_config_revokes() {
    let store = orders_store().await;
    let resource = RoleResource::new("roleX", "orders");
    let update = ResourceAction::new(resource.id, "update");
    save_resource(&store, resource.clone(), vec![update.clone()]).await;
    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let mut disabled = resource.clone();
    disabled.using_actions_config = false;
    save_resource(&store, disabled, vec![update]).await;
    engine
        .handle(
            LifecycleEvent::ResourceSaved {
                role_name: "roleX".to_string(),
                resource_name: "orders".to_string(),
            }
            .into(),
        )
        .await
        .unwrap();

    assert!(engine.acl().effective_grants().await.is_empty());
}

#[tokio::test]
async fn test_collection_destroyed_removes_resources() {
    let store = orders_store().await;
    store
        .upsert_role(Role::new("member", "Member"), None)
        .await
        .unwrap();
    for role in ["roleX", "member"] {
        let resource = RoleResource::new(role, "orders");
        let view = ResourceAction::new(resource.id, "view");
        save_resource(&store, resource, vec![view]).await;
    }
    let engine = engine_for(&store);
    engine.bootstrap().await.unwrap();

    let tx = store.begin().await;
    store.destroy_collection("orders").await;
    let outcome = engine
        .handle(LifecycleNotification::within(
            LifecycleEvent::CollectionDestroyed {
                collection_name: "orders".to_string(),
            },
            tx,
        ))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Staged {
            transaction: tx,
            plans: 2,
            rewritten: 0
        }
    );
    assert_eq!(engine.acl().effective_grants().await.len(), 6);

    assert_eq!(engine.commit(&store, tx).await.unwrap(), 2);
    assert!(engine.acl().effective_grants().await.is_empty());
    assert!(store
        .find_by_collection("orders", None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_rebuild_matches_incremental_state() {
    let snapshot = StoreSnapshot::from_json(
        r#"{
            "roles": [
                { "name": "clerk", "resources": [
                    { "name": "invoices", "actions": [{ "name": "create" }] },
                    { "name": "orders", "actions": [
                        { "name": "update", "fields": ["items"] },
                        { "name": "view" }
                    ] }
                ] }
            ],
            "collections": {
                "orders": [
                    { "name": "total" },
                    { "name": "items", "association": { "kind": "linkTo", "target": "lineItems" } }
                ],
                "invoices": [
                    { "name": "lines", "association": { "kind": "linkTo", "target": "lineItems" } }
                ]
            }
        }"#,
    )
    .unwrap();

    let mut reversed = snapshot.clone();
    reversed.roles[0].resources.reverse();

    let forward = engine_for(&MemoryStore::from_snapshot(snapshot).unwrap());
    forward.bootstrap().await.unwrap();
    let backward = engine_for(&MemoryStore::from_snapshot(reversed).unwrap());
    backward.bootstrap().await.unwrap();

    let grants = forward.acl().effective_grants().await;
    assert_eq!(grants, backward.acl().effective_grants().await);
    assert!(!grants.is_empty());

    // a rebuild over the same records converges to the same state
    forward.rebuild().await.unwrap();
    assert_eq!(forward.acl().effective_grants().await, grants);
}
