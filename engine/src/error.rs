//! Error types for the listsync engine.

use crate::{query::QueryKey, CollectionName, EntityId};
use thiserror::Error;

/// All possible errors from the listsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Entity errors
    #[error("entity not found: {collection}/{id}")]
    EntityNotFound {
        collection: CollectionName,
        id: EntityId,
    },

    #[error("entity already exists: {collection}/{id}")]
    EntityAlreadyExists {
        collection: CollectionName,
        id: EntityId,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // Query errors
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("query record not found: {0}")]
    QueryRecordNotFound(QueryKey),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot format mismatch: expected {expected}, got {actual}")]
    SnapshotVersionMismatch { expected: u32, actual: u32 },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::EntityNotFound {
            collection: "channels".into(),
            id: "general".into(),
        };
        assert_eq!(err.to_string(), "entity not found: channels/general");

        let err = Error::SnapshotVersionMismatch {
            expected: 1,
            actual: 2,
        };
        assert_eq!(err.to_string(), "snapshot format mismatch: expected 1, got 2");

        let err = Error::InvalidQuery("page size must be positive".into());
        assert_eq!(err.to_string(), "invalid query: page size must be positive");
    }
}
