//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory Store and durable storage.
//! They serialize deterministically so identical state always produces
//! identical bytes.

use crate::{
    error::Result,
    query::{QueryKey, QueryRecord},
    CollectionName, Entity, EntityId, Error, Revision,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Store revision at snapshot time
    pub revision: Revision,
    /// All entities organized by collection, then by entity ID
    pub collections: BTreeMap<CollectionName, BTreeMap<EntityId, Entity>>,
    /// Durable query records by key
    #[serde(default)]
    pub query_records: BTreeMap<QueryKey, QueryRecord>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(revision: Revision) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            revision,
            collections: BTreeMap::new(),
            query_records: BTreeMap::new(),
        }
    }

    /// Add an entity to the snapshot.
    pub fn add_entity(&mut self, entity: Entity) {
        self.collections
            .entry(entity.collection.clone())
            .or_default()
            .insert(entity.id.clone(), entity);
    }

    /// Get an entity from the snapshot.
    pub fn get_entity(&self, collection: &str, id: &str) -> Option<&Entity> {
        self.collections.get(collection)?.get(id)
    }

    /// Add a query record.
    pub fn add_record(&mut self, record: QueryRecord) {
        self.query_records.insert(record.key.clone(), record);
    }

    /// Count entities across all collections.
    pub fn entity_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::SnapshotVersionMismatch {
                expected: SNAPSHOT_FORMAT_VERSION,
                actual: self.format_version,
            });
        }

        for (collection_name, entities) in &self.collections {
            for (id, entity) in entities {
                if entity.id != *id || entity.collection != *collection_name {
                    return Err(Error::InvalidSnapshot(format!(
                        "entity {}/{} filed under {}/{}",
                        entity.collection, entity.id, collection_name, id
                    )));
                }
            }
        }

        for (key, record) in &self.query_records {
            if record.key != *key || record.query.key() != *key {
                return Err(Error::InvalidSnapshot(format!(
                    "query record filed under mismatched key: {key}"
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
