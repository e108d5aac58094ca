//! Durable registry of active queries.
//!
//! Records live in the store, so every registry change is a store
//! transaction and survives a restart when the store is persistent.

use crate::error::StoreError;
use crate::store::SharedStore;
use listsync_engine::{QueryKey, QueryRecord, WriteBatch, WriteOp};

/// Query records, unique by key.
#[derive(Clone)]
pub struct QueryRegistry {
    store: SharedStore,
}

impl QueryRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Every registered query, ordered by key.
    pub async fn all(&self) -> Result<Vec<QueryRecord>, StoreError> {
        self.store.query_records().await
    }

    pub async fn get(&self, key: &QueryKey) -> Result<Option<QueryRecord>, StoreError> {
        self.store.query_record(key).await
    }

    /// Insert or replace the record with the same key.
    pub async fn upsert(&self, record: QueryRecord) -> Result<(), StoreError> {
        tracing::debug!(query = %record.key, "Registering query");
        self.store
            .commit(WriteBatch::new().with(WriteOp::PutQueryRecord { record }))
            .await?;
        Ok(())
    }

    /// Forget a query. Entities it linked stay in the store.
    pub async fn remove(&self, key: &QueryKey) -> Result<(), StoreError> {
        tracing::debug!(query = %key, "Removing query");
        self.store
            .commit(WriteBatch::new().with(WriteOp::RemoveQueryRecord { key: key.clone() }))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for QueryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRegistry").finish_non_exhaustive()
    }
}
