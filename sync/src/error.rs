//! Unified error handling for the sync runtime.
//!
//! Every error here is `Clone`: a failed flight hands the same error to each
//! caller that joined it.

use listsync_engine::{EntityId, QueryKey};

pub use crate::remote::RemoteError;

/// Local read or write failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("engine error: {0}")]
    Engine(#[from] listsync_engine::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

/// Failure of `synchronize`, `load_next` or a linkage update.
///
/// A `SyncError` is never partially applied: the store and the query's
/// cursor are as they were before the call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("sync task interrupted: {0}")]
    Interrupted(String),
}

impl From<listsync_engine::Error> for SyncError {
    fn from(err: listsync_engine::Error) -> Self {
        match err {
            listsync_engine::Error::InvalidQuery(msg) => SyncError::InvalidQuery(msg),
            other => SyncError::Store(StoreError::Engine(other)),
        }
    }
}

/// One (entity, query) pair the linker failed to update.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("linking {entity_id} into {query_key} failed: {error}")]
pub struct LinkageFailure {
    pub entity_id: EntityId,
    pub query_key: QueryKey,
    pub error: SyncError,
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
