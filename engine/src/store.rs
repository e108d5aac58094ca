//! Store - the transactional in-memory state container.
//!
//! The Store holds entities by collection and the durable query records.
//! Writes arrive as [`WriteBatch`]es and are applied all-or-nothing; every
//! successful batch advances the store revision by one.

use crate::{
    error::Result,
    filter::compare_entities,
    query::{FetchRequest, QueryKey, QueryRecord},
    Attributes, CollectionName, Entity, EntityId, EntityPayload, Error, Revision, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A collection of entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    entities: HashMap<EntityId, Entity>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }

    /// Get an entity by ID.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Insert or replace an entity.
    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// All entities, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WriteOp {
    /// Merge a remote payload, creating the entity if missing
    Upsert {
        collection: CollectionName,
        payload: EntityPayload,
    },
    /// Create a local entity; fails if the id exists
    Insert { entity: Entity },
    /// Apply a local attribute patch
    Patch {
        collection: CollectionName,
        id: EntityId,
        attributes: Attributes,
    },
    Remove {
        collection: CollectionName,
        id: EntityId,
    },
    /// Mark an entity as belonging to a query
    Link {
        collection: CollectionName,
        id: EntityId,
        key: QueryKey,
    },
    /// Detach a query from every entity linked to it
    UnlinkAll { key: QueryKey },
    /// Claim a linkage-pending entity; a no-op if already claimed or gone
    ClearLinkagePending {
        collection: CollectionName,
        id: EntityId,
    },
    PutQueryRecord { record: QueryRecord },
    /// Bump a record's update time and linked count without touching its
    /// pagination state
    TouchQueryRecord { key: QueryKey, linked: u64 },
    RemoveQueryRecord { key: QueryKey },
}

/// An atomic group of writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn with(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl FromIterator<WriteOp> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = WriteOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// What a committed batch changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    /// Store revision after the commit
    pub revision: Revision,
    /// Collections whose entities changed
    pub collections: BTreeSet<CollectionName>,
    /// Linkage-pending entities created by this commit
    pub created_pending: Vec<EntityId>,
    /// Entities whose pending flag this commit cleared, as (collection, id)
    pub cleared_pending: Vec<(CollectionName, EntityId)>,
    /// Whether any query record changed
    pub records_changed: bool,
}

impl CommitSummary {
    /// Whether entities of `collection` may have changed.
    pub fn touches(&self, collection: &str) -> bool {
        self.collections.contains(collection)
    }
}

/// The main store holding all state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    /// Collections by name, created on first write
    collections: HashMap<CollectionName, Collection>,
    /// Durable query records by key
    query_records: BTreeMap<QueryKey, QueryRecord>,
    /// Number of committed batches
    revision: Revision,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Apply a batch of writes.
    ///
    /// The batch is applied to a staged copy; the store only changes if
    /// every write succeeds.
    pub fn apply(&mut self, batch: WriteBatch, timestamp: Timestamp) -> Result<CommitSummary> {
        let mut staged = self.clone();
        let summary = staged.apply_in_place(batch, timestamp)?;
        *self = staged;
        Ok(summary)
    }

    /// Preview the outcome of a batch without changing the store.
    pub fn staged(&self, batch: WriteBatch, timestamp: Timestamp) -> Result<(Store, CommitSummary)> {
        let mut staged = self.clone();
        let summary = staged.apply_in_place(batch, timestamp)?;
        Ok((staged, summary))
    }

    fn apply_in_place(&mut self, batch: WriteBatch, timestamp: Timestamp) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();

        for op in batch.ops {
            match op {
                WriteOp::Upsert {
                    collection,
                    payload,
                } => {
                    let target = self.collections.entry(collection.clone()).or_default();
                    match target.get_mut(&payload.id) {
                        Some(existing) => existing.merge_payload(payload, timestamp),
                        None => {
                            target.insert(Entity::from_payload(&collection, payload, timestamp))
                        }
                    }
                    summary.collections.insert(collection);
                }
                WriteOp::Insert { entity } => {
                    let target = self.collections.entry(entity.collection.clone()).or_default();
                    if target.contains(&entity.id) {
                        return Err(Error::EntityAlreadyExists {
                            collection: entity.collection,
                            id: entity.id,
                        });
                    }
                    if entity.awaits_linkage() {
                        summary.created_pending.push(entity.id.clone());
                    }
                    summary.collections.insert(entity.collection.clone());
                    target.insert(entity);
                }
                WriteOp::Patch {
                    collection,
                    id,
                    attributes,
                } => {
                    self.entity_mut(&collection, &id)?.patch(attributes, timestamp);
                    summary.collections.insert(collection);
                }
                WriteOp::Remove { collection, id } => {
                    let removed = self
                        .collections
                        .get_mut(&collection)
                        .and_then(|c| c.entities.remove(&id));
                    if removed.is_none() {
                        return Err(Error::EntityNotFound { collection, id });
                    }
                    summary.collections.insert(collection);
                }
                WriteOp::Link {
                    collection,
                    id,
                    key,
                } => {
                    let entity = self.entity_mut(&collection, &id)?;
                    entity.linkage_pending = false;
                    if entity.linked_queries.insert(key) {
                        summary.collections.insert(collection);
                    }
                }
                WriteOp::UnlinkAll { key } => {
                    for (name, collection) in self.collections.iter_mut() {
                        for entity in collection.entities.values_mut() {
                            if entity.linked_queries.remove(&key) {
                                summary.collections.insert(name.clone());
                            }
                        }
                    }
                }
                WriteOp::ClearLinkagePending { collection, id } => {
                    let entity = self
                        .collections
                        .get_mut(&collection)
                        .and_then(|c| c.get_mut(&id));
                    if let Some(entity) = entity.filter(|e| e.linkage_pending) {
                        entity.linkage_pending = false;
                        summary.cleared_pending.push((collection, id));
                    }
                }
                WriteOp::PutQueryRecord { record } => {
                    self.query_records.insert(record.key.clone(), record);
                    summary.records_changed = true;
                }
                WriteOp::TouchQueryRecord { key, linked } => {
                    let record = self
                        .query_records
                        .get_mut(&key)
                        .ok_or_else(|| Error::QueryRecordNotFound(key.clone()))?;
                    record.linked_count += linked;
                    record.updated_at = timestamp;
                    summary.records_changed = true;
                }
                WriteOp::RemoveQueryRecord { key } => {
                    if self.query_records.remove(&key).is_none() {
                        return Err(Error::QueryRecordNotFound(key));
                    }
                    summary.records_changed = true;
                }
            }
        }

        self.revision += 1;
        summary.revision = self.revision;
        Ok(summary)
    }

    fn entity_mut(&mut self, collection: &str, id: &str) -> Result<&mut Entity> {
        self.collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| Error::EntityNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    /// Get an entity by collection and ID.
    pub fn get(&self, collection: &str, id: &str) -> Option<&Entity> {
        self.collections.get(collection).and_then(|c| c.get(id))
    }

    /// Get a collection by name.
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Entities matching a request, in the request's sort order.
    pub fn fetch(&self, request: &FetchRequest) -> Vec<Entity> {
        let Some(collection) = self.collections.get(&request.collection) else {
            return Vec::new();
        };
        let mut items: Vec<Entity> = collection
            .entities()
            .filter(|e| match &request.linked_to {
                Some(key) => e.is_linked_to(key),
                None => true,
            })
            .filter(|e| request.filter.matches(e))
            .cloned()
            .collect();
        items.sort_by(|a, b| compare_entities(a, b, &request.sort));
        items
    }

    /// Entities created locally and not yet claimed by the linker, oldest
    /// first.
    pub fn pending_linkage(&self) -> Vec<Entity> {
        let mut pending: Vec<Entity> = self
            .collections
            .values()
            .flat_map(|c| c.entities())
            .filter(|e| e.awaits_linkage())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        pending
    }

    /// All query records, ordered by key.
    pub fn query_records(&self) -> Vec<QueryRecord> {
        self.query_records.values().cloned().collect()
    }

    pub fn query_record(&self, key: &QueryKey) -> Option<&QueryRecord> {
        self.query_records.get(key)
    }

    /// Export the current store state as a snapshot.
    pub fn export_state(&self) -> crate::snapshot::StoreSnapshot {
        let mut snapshot = crate::snapshot::StoreSnapshot::new(self.revision);
        for collection in self.collections.values() {
            for entity in collection.entities() {
                snapshot.add_entity(entity.clone());
            }
        }
        for record in self.query_records.values() {
            snapshot.add_record(record.clone());
        }
        snapshot
    }

    /// Replace the store's state with a snapshot.
    pub fn import_state(&mut self, snapshot: crate::snapshot::StoreSnapshot) -> Result<()> {
        snapshot.validate()?;

        self.collections.clear();
        for (name, entities) in snapshot.collections {
            let collection = self.collections.entry(name).or_default();
            for (_, entity) in entities {
                collection.insert(entity);
            }
        }
        self.query_records = snapshot.query_records;
        self.revision = snapshot.revision;
        Ok(())
    }

    /// Build a store from a snapshot.
    pub fn from_snapshot(snapshot: crate::snapshot::StoreSnapshot) -> Result<Self> {
        let mut store = Self::new();
        store.import_state(snapshot)?;
        Ok(store)
    }
}
