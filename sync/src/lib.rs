//! # listsync
//!
//! Async runtime for offline-first list synchronization.
//!
//! The pure model (entities, queries, the transactional store, diffing and
//! position mapping) lives in `listsync-engine`. This crate adds the parts
//! that wait on something:
//!
//! - [`StoreObserver`] turns store commits into position-level change
//!   batches for one query
//! - [`ListUpdater`] pages remote results into the store, one flight per
//!   query and kind at a time
//! - [`QueryLinker`] finds the queries a locally created entity belongs to
//! - [`QueryRegistry`] keeps the durable query records
//!
//! [`ListSync`] wires them together over a [`PersistentStore`] and a
//! [`RemoteApi`].
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let sync = ListSync::new(store, Arc::new(remote), SyncConfig::default());
//!
//! let query = Query::new("channels").sort_by(SortKey::desc("last_message_at"));
//! let (items, mut changes) = sync.observe_query(query.clone()).await?;
//! sync.synchronize(&query).await?;
//!
//! while let Some(batch) = changes.next_batch().await {
//!     match batch.positions {
//!         Some(positions) => apply(positions),
//!         None => reload(&batch.items),
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod linker;
pub mod observer;
pub mod registry;
pub mod remote;
pub mod store;
pub mod updater;

pub use client::ListSync;
pub use config::{ConfigError, SyncConfig};
pub use error::{LinkageFailure, Result, StoreError, SyncError};
pub use linker::{LinkReport, LinkerState, QueryLinker};
pub use observer::{ChangeBatch, Items, ObserverEvent, StoreObserver, Subscription};
pub use registry::QueryRegistry;
pub use remote::{InMemoryRemote, Page, PageRequest, RemoteApi, RemoteError, SharedRemote};
pub use store::{MemoryStore, PersistentStore, SharedStore};
pub use updater::{LinkOutcome, ListUpdater, PageOutcome};

pub use listsync_engine as engine;

/// Milliseconds since the Unix epoch, the timestamp unit of the store.
pub fn now_millis() -> listsync_engine::Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
