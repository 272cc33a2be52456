//! Schema provider implementation

use async_trait::async_trait;
use tracing::instrument;

use warden_core::{FieldMeta, Result, SchemaProvider};

use crate::store::MemoryStore;

#[async_trait]
impl SchemaProvider for MemoryStore {
    #[instrument(skip(self))]
    async fn collection_fields(&self, collection: &str) -> Result<Vec<FieldMeta>> {
        Ok(self.fields_of(collection).await)
    }
}
