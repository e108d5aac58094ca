//! Persistent store abstraction.
//!
//! The sync runtime reads and writes local state only through
//! [`PersistentStore`]. Writes are whole [`WriteBatch`]es: a batch either
//! commits completely or not at all, and every commit is announced to
//! subscribers in commit order.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use listsync_engine::{
    CommitSummary, Entity, FetchRequest, QueryKey, QueryRecord, Revision, WriteBatch,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Store shared by the observer, updater, linker and registry.
pub type SharedStore = Arc<dyn PersistentStore>;

/// Local persistence collaborator.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Entities of a collection matching the request, in sort order.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Entity>, StoreError>;

    /// Like [`fetch`](Self::fetch), together with the revision the entities
    /// were read at.
    async fn fetch_at(
        &self,
        request: &FetchRequest,
    ) -> Result<(Revision, Vec<Entity>), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Entity>, StoreError>;

    /// Locally created entities no query has claimed yet, oldest first.
    async fn pending_linkage(&self) -> Result<Vec<Entity>, StoreError>;

    async fn query_records(&self) -> Result<Vec<QueryRecord>, StoreError>;

    async fn query_record(&self, key: &QueryKey) -> Result<Option<QueryRecord>, StoreError>;

    /// Number of batches committed so far.
    async fn revision(&self) -> Result<Revision, StoreError>;

    /// Apply a batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitSummary, StoreError>;

    /// Receive a summary of every later commit.
    fn subscribe(&self) -> broadcast::Receiver<CommitSummary>;
}
