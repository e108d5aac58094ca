//! In-memory store with optional snapshot persistence.

use super::PersistentStore;
use crate::config::SyncConfig;
use crate::error::StoreError;
use crate::now_millis;
use async_trait::async_trait;
use listsync_engine::{
    CommitSummary, Entity, FetchRequest, QueryKey, QueryRecord, Revision, Store, StoreSnapshot,
    WriteBatch,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::{broadcast, RwLock};

/// Commit summaries buffered per subscriber.
const COMMIT_CHANNEL_CAPACITY: usize = 256;

/// A [`PersistentStore`] over the engine's [`Store`].
///
/// Writes are serialized behind an async `RwLock`. When opened on a path,
/// every commit also rewrites the snapshot file before the new state becomes
/// visible, so a failed write leaves memory and disk as they were.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<Store>,
    commits: broadcast::Sender<CommitSummary>,
    snapshot_path: Option<PathBuf>,
    faults: Mutex<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    fetch: Option<StoreError>,
    commit: Option<StoreError>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_store(Store::new(), None)
    }
}

impl MemoryStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_store(store: Store, snapshot_path: Option<PathBuf>) -> Self {
        let (commits, _) = broadcast::channel(COMMIT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(store),
            commits,
            snapshot_path,
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Open a store persisted at `path`, loading the snapshot if one exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let store = match tokio::fs::read_to_string(&path).await {
            Ok(json) => Store::from_snapshot(StoreSnapshot::from_json(&json)?)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Store::new(),
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            path = %path.display(),
            revision = store.revision(),
            "Opened persistent store"
        );
        Ok(Self::with_store(store, Some(path)))
    }

    /// Open the store the configuration asks for.
    pub async fn from_config(config: &SyncConfig) -> Result<Self, StoreError> {
        match &config.snapshot_path {
            Some(path) => Self::open(path).await,
            None => Ok(Self::new()),
        }
    }

    /// Full copy of the current state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.export_state()
    }

    /// Fail the next read with `error`.
    pub fn fail_next_fetch(&self, error: StoreError) {
        self.faults().fetch = Some(error);
    }

    /// Fail the next commit with `error`.
    pub fn fail_next_commit(&self, error: StoreError) {
        self.faults().commit = Some(error);
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_fetch(&self) -> Result<(), StoreError> {
        match self.faults().fetch.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_commit(&self) -> Result<(), StoreError> {
        match self.faults().commit.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Write the snapshot next to `path`, then move it into place.
async fn persist(path: &Path, store: &Store) -> Result<(), StoreError> {
    let json = store.export_state().to_json_pretty()?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, json).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Entity>, StoreError> {
        self.check_fetch()?;
        Ok(self.state.read().await.fetch(request))
    }

    async fn fetch_at(
        &self,
        request: &FetchRequest,
    ) -> Result<(Revision, Vec<Entity>), StoreError> {
        self.check_fetch()?;
        let state = self.state.read().await;
        Ok((state.revision(), state.fetch(request)))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Entity>, StoreError> {
        self.check_fetch()?;
        Ok(self.state.read().await.get(collection, id).cloned())
    }

    async fn pending_linkage(&self) -> Result<Vec<Entity>, StoreError> {
        self.check_fetch()?;
        Ok(self.state.read().await.pending_linkage())
    }

    async fn query_records(&self) -> Result<Vec<QueryRecord>, StoreError> {
        self.check_fetch()?;
        Ok(self.state.read().await.query_records())
    }

    async fn query_record(&self, key: &QueryKey) -> Result<Option<QueryRecord>, StoreError> {
        self.check_fetch()?;
        Ok(self.state.read().await.query_record(key).cloned())
    }

    async fn revision(&self) -> Result<Revision, StoreError> {
        Ok(self.state.read().await.revision())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitSummary, StoreError> {
        self.check_commit()?;

        let mut state = self.state.write().await;
        let ops = batch.len();
        let (staged, summary) = state.staged(batch, now_millis())?;

        if let Some(path) = &self.snapshot_path {
            persist(path, &staged).await?;
        }
        *state = staged;

        tracing::debug!(
            revision = summary.revision,
            ops,
            collections = ?summary.collections,
            "Committed batch"
        );

        // Sent under the write lock so subscribers see commit order.
        // No receivers is not an error.
        let _ = self.commits.send(summary.clone());
        Ok(summary)
    }

    fn subscribe(&self) -> broadcast::Receiver<CommitSummary> {
        self.commits.subscribe()
    }
}
