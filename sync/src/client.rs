//! Application-facing entry point.

use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError};
use crate::linker::QueryLinker;
use crate::observer::{Items, StoreObserver, Subscription};
use crate::registry::QueryRegistry;
use crate::remote::SharedRemote;
use crate::store::SharedStore;
use crate::updater::{ListUpdater, PageOutcome};
use listsync_engine::{Attributes, Entity, Query, WriteBatch, WriteOp};
use serde_json::Value;

/// Wires the registry, updater, observers and linker over one store and one
/// remote.
pub struct ListSync {
    store: SharedStore,
    registry: QueryRegistry,
    updater: ListUpdater,
    linker: QueryLinker,
    config: SyncConfig,
}

impl std::fmt::Debug for ListSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListSync")
            .field("updater", &self.updater)
            .field("linker", &self.linker)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ListSync {
    pub fn new(store: SharedStore, remote: SharedRemote, config: SyncConfig) -> Self {
        let registry = QueryRegistry::new(store.clone());
        let updater = ListUpdater::new(store.clone(), remote, registry.clone(), config.clone());
        let linker = QueryLinker::new(store.clone(), registry.clone(), updater.clone());
        Self {
            store,
            registry,
            updater,
            linker,
            config,
        }
    }

    /// Observe a query's local results.
    ///
    /// Returns the items at the time of the call and the stream of change
    /// batches, starting with a reset batch for those items.
    pub async fn observe_query(&self, query: Query) -> Result<(Items, Subscription), StoreError> {
        let mut observer = StoreObserver::new(self.store.clone(), query, &self.config);
        let subscription = observer.start_observing().await?;
        Ok((observer.current_items(), subscription))
    }

    pub async fn synchronize(&self, query: &Query) -> Result<PageOutcome, SyncError> {
        self.updater.synchronize(query).await
    }

    pub async fn load_next(&self, query: &Query) -> Result<PageOutcome, SyncError> {
        self.updater.load_next(query).await
    }

    /// Create an entity locally. It shows up in queries once the linker
    /// has confirmed them with the remote.
    pub async fn create_local(
        &self,
        collection: &str,
        attributes: Value,
    ) -> Result<Entity, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let entity = Entity::new_local(id, collection, attributes, crate::now_millis());
        self.insert_local(entity.clone()).await?;
        Ok(entity)
    }

    /// Store an entity built by the caller. Fails if the id is taken.
    pub async fn insert_local(&self, entity: Entity) -> Result<(), StoreError> {
        let (id, collection) = (entity.id.clone(), entity.collection.clone());
        self.store
            .commit(WriteBatch::new().with(WriteOp::Insert { entity }))
            .await?;
        tracing::debug!(entity_id = %id, collection = %collection, "Created local entity");
        Ok(())
    }

    /// Patch a stored entity's attributes. `null` removes an attribute.
    pub async fn patch_local(
        &self,
        collection: &str,
        id: &str,
        attributes: Attributes,
    ) -> Result<(), StoreError> {
        self.store
            .commit(WriteBatch::new().with(WriteOp::Patch {
                collection: collection.to_string(),
                id: id.to_string(),
                attributes,
            }))
            .await?;
        Ok(())
    }

    /// Start resolving locally created entities in the background.
    pub fn start_linker(&mut self) -> &QueryLinker {
        self.linker.start();
        &self.linker
    }

    pub fn linker(&self) -> &QueryLinker {
        &self.linker
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    pub fn updater(&self) -> &ListUpdater {
        &self.updater
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}
