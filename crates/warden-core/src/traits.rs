//! Collaborator traits for the Warden grant engine
//!
//! Storage of role records and schema metadata is owned by the host
//! application. The engine only reads through these traits and performs the
//! few writes its lifecycle handlers require (default-role clearing, action
//! field lists, collection cleanup), always inside the caller's unit of work.

use crate::{error::Result, ids::*, models::*};
use async_trait::async_trait;

// =============================================================================
// Repository Traits
// =============================================================================

/// Role records and their nested resources
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Every role with resources and actions appended, as used by full rebuild
    async fn list_with_resources(&self) -> Result<Vec<RoleWithResources>>;

    async fn get(&self, name: &str, tx: Option<TransactionId>) -> Result<Option<Role>>;

    /// Set `default = false` on every role except `name`; returns rows changed
    async fn clear_default_except(&self, name: &str, tx: Option<TransactionId>) -> Result<u64>;
}

/// Resource records, keyed by (role name, collection name)
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn get_with_actions(
        &self,
        role_name: &str,
        name: &str,
        tx: Option<TransactionId>,
    ) -> Result<Option<ResourceWithActions>>;

    async fn list_by_role(
        &self,
        role_name: &str,
        tx: Option<TransactionId>,
    ) -> Result<Vec<ResourceWithActions>>;

    /// Delete every resource (and its actions) named after `collection`
    async fn delete_by_collection(
        &self,
        collection: &str,
        tx: Option<TransactionId>,
    ) -> Result<Vec<RoleResource>>;
}

/// Action records
#[async_trait]
pub trait ActionRepository: Send + Sync {
    /// The action together with the resource that owns it
    async fn get_with_resource(
        &self,
        id: ActionId,
        tx: Option<TransactionId>,
    ) -> Result<Option<(RoleResource, ResourceAction)>>;

    /// Every action whose owning resource is named `collection`
    async fn find_by_collection(
        &self,
        collection: &str,
        tx: Option<TransactionId>,
    ) -> Result<Vec<(RoleResource, ResourceAction)>>;

    async fn update_fields(
        &self,
        id: ActionId,
        fields: &[String],
        tx: Option<TransactionId>,
    ) -> Result<()>;

    /// Remove one action record; `false` when it was already gone
    async fn delete(&self, id: ActionId, tx: Option<TransactionId>) -> Result<bool>;
}

/// Transaction boundary of the persisted records
///
/// Lifecycle notifications carry the token returned by [`begin`]; the sync
/// engine publishes the registry changes staged under it only once
/// [`commit`] succeeds.
///
/// [`begin`]: UnitOfWork::begin
/// [`commit`]: UnitOfWork::commit
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<TransactionId>;

    async fn commit(&self, tx: TransactionId) -> Result<()>;

    async fn rollback(&self, tx: TransactionId) -> Result<()>;
}

// =============================================================================
// Schema Metadata
// =============================================================================

/// Collection/field metadata lookup
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// All fields of a collection; empty when the collection is unknown
    async fn collection_fields(&self, collection: &str) -> Result<Vec<FieldMeta>>;

    async fn field(&self, collection: &str, field: &str) -> Result<Option<FieldMeta>> {
        Ok(self
            .collection_fields(collection)
            .await?
            .into_iter()
            .find(|meta| meta.name == field))
    }
}
