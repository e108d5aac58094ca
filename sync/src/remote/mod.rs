//! Remote API abstraction.
//!
//! The sync runtime never speaks a wire protocol itself. It asks a
//! [`RemoteApi`] for pages of entities and tells it which queries this client
//! wants live updates for.
//!
//! # Example
//!
//! ```ignore
//! let remote = InMemoryRemote::new();
//! remote.seed("channels", payloads);
//! let page = remote.list(PageRequest::first(query)).await?;
//! ```

mod memory;

pub use memory::InMemoryRemote;

use async_trait::async_trait;
use listsync_engine::{EntityPayload, PageCursor, Query};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Remote shared by the updater and the linker.
pub type SharedRemote = Arc<dyn RemoteApi>;

/// Remote API errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request never got a response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("decode failure: {0}")]
    Decode(String),

    /// The server answered with an error.
    #[error("rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// A request for one page of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub query: Query,
    pub cursor: PageCursor,
}

impl PageRequest {
    pub fn first(query: Query) -> Self {
        Self {
            query,
            cursor: PageCursor::start(),
        }
    }

    pub fn at(query: Query, cursor: PageCursor) -> Self {
        Self { query, cursor }
    }
}

/// One page of remote results, in query order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub entities: Vec<EntityPayload>,
    /// Whether more results exist past this page
    pub has_more: bool,
}

/// Remote collaborator for list synchronization.
///
/// Implementations wrap whatever transport the host application uses.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// List entities matching the query's filter and sort, starting at the
    /// cursor, at most `query.page_size` of them.
    async fn list(&self, request: PageRequest) -> Result<Page, RemoteError>;

    /// Tell the server this client wants live updates for the query.
    async fn update_subscription(&self, query: &Query) -> Result<(), RemoteError>;
}
