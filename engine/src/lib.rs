//! # listsync Engine
//!
//! The deterministic core of an offline-first list synchronization engine.
//!
//! This crate keeps the pure half of the system: the entity and query model,
//! the transactional in-memory store, snapshot diffing and the mapping of
//! change batches onto list positions. The async runtime that talks to a
//! remote API lives in the `listsync` crate.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or threads
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Conservative**: an ambiguous change batch is reported, never guessed
//!
//! ## Core Concepts
//!
//! ### Entities and queries
//!
//! An [`Entity`] is a domain object (a channel, a message) with attributes,
//! relationships, and the set of queries it is linked to. A [`Query`] is a
//! collection plus a [`Filter`] and sort order; its [`QueryKey`] identity
//! excludes page size. A [`QueryRecord`] is the durable form of a query
//! together with its pagination cursor.
//!
//! ### Store
//!
//! The [`Store`] applies [`WriteBatch`]es atomically and answers
//! [`FetchRequest`]s in sort order. Every commit advances the revision.
//!
//! ### Diffing and mapping
//!
//! [`diff`] turns two ordered snapshots into [`ChangeEvent`]s, and
//! [`ChangeSetMapper`] turns a change batch into a disjoint [`PositionSet`]
//! or `None` when the list must be reloaded.
//!
//! ## Quick Start
//!
//! ```rust
//! use listsync_engine::{
//!     diff, ChangeSetMapper, EntityPayload, Query, SortKey, Store, WriteBatch, WriteOp,
//! };
//! use serde_json::json;
//!
//! let query = Query::new("channels").sort_by(SortKey::asc("name"));
//! let key = query.key();
//!
//! let mut store = Store::new();
//! let mut batch = WriteBatch::new();
//! for name in ["alpha", "beta"] {
//!     batch.push(WriteOp::Upsert {
//!         collection: "channels".into(),
//!         payload: EntityPayload::new(name, json!({"name": name})),
//!     });
//!     batch.push(WriteOp::Link {
//!         collection: "channels".into(),
//!         id: name.into(),
//!         key: key.clone(),
//!     });
//! }
//! store.apply(batch, 1706745600000).unwrap();
//!
//! let current = store.fetch(&query.linked_fetch());
//! let changes = diff(&[], &current);
//! let positions = ChangeSetMapper::new(0, current.len()).map(&changes).unwrap();
//! assert_eq!(positions.insert.len(), 2);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module exposes [`diff`] and [`ChangeSetMapper`] to native UI
//! hosts as JSON-in, JSON-out C functions.

pub mod change;
pub mod diff;
pub mod entity;
pub mod error;
pub mod ffi;
pub mod filter;
pub mod mapper;
pub mod query;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use change::{ChangeEvent, ChangeKind, Move, PositionSet};
pub use diff::diff;
pub use entity::{Attributes, Entity, EntityPayload, Metadata, Origin, Relationships};
pub use error::Error;
pub use filter::{compare_entities, Direction, Filter, SortKey};
pub use mapper::{map_changes, ChangeSetMapper};
pub use query::{
    FetchRequest, PageCursor, Pagination, Query, QueryKey, QueryRecord, DEFAULT_PAGE_SIZE,
};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Collection, CommitSummary, Store, WriteBatch, WriteOp};

/// Type aliases for clarity
pub type EntityId = String;
pub type CollectionName = String;
pub type Timestamp = u64;
pub type Revision = u64;
