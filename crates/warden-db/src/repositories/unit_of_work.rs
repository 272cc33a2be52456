//! Unit-of-work implementation

use async_trait::async_trait;

use warden_core::{Result, TransactionId, UnitOfWork};

use crate::store::MemoryStore;

#[async_trait]
impl UnitOfWork for MemoryStore {
    async fn begin(&self) -> Result<TransactionId> {
        Ok(MemoryStore::begin(self).await)
    }

    async fn commit(&self, tx: TransactionId) -> Result<()> {
        MemoryStore::commit(self, tx).await
    }

    async fn rollback(&self, tx: TransactionId) -> Result<()> {
        MemoryStore::rollback(self, tx).await
    }
}
