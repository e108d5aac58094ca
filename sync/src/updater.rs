//! Remote-to-local list updates.
//!
//! [`ListUpdater`] fetches pages from the remote and commits them in one
//! store transaction together with the query's new cursor.
//!
//! Every query has a lane. A call of a kind that is already in flight for
//! the query joins that flight and receives the same result; a call of the
//! other kind starts a new flight that waits for the lane's last flight to
//! finish, so a `load_next` issued during `synchronize` reads the cursor
//! `synchronize` established. Flights run on spawned tasks: a caller that
//! stops waiting does not cancel the work.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::now_millis;
use crate::registry::QueryRegistry;
use crate::remote::{PageRequest, SharedRemote};
use crate::store::SharedStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use listsync_engine::{
    EntityId, EntityPayload, PageCursor, Query, QueryKey, QueryRecord, WriteBatch, WriteOp,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Flight<T> = Shared<BoxFuture<'static, Result<T, SyncError>>>;

/// Result of a `synchronize` or `load_next` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    pub key: QueryKey,
    /// Entities the page contained
    pub fetched: usize,
    /// Where the next page starts
    pub cursor: PageCursor,
    pub has_more: bool,
    /// No request was made because the query had nothing left to load
    pub exhausted: bool,
}

/// Result of a linkage update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Query the entities were linked into
    pub key: QueryKey,
    /// Entities the remote confirmed as members
    pub linked: Vec<EntityId>,
}

impl LinkOutcome {
    pub fn is_linked(&self) -> bool {
        !self.linked.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageKind {
    Synchronize,
    LoadNext,
}

struct InFlight<T> {
    id: u64,
    flight: Flight<T>,
}

impl<T> Clone for InFlight<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            flight: self.flight.clone(),
        }
    }
}

#[derive(Default)]
struct Lane {
    synchronize: Option<InFlight<PageOutcome>>,
    load_next: Option<InFlight<PageOutcome>>,
    /// Most recently started flight; the next one starts after it
    tail: Option<InFlight<PageOutcome>>,
}

impl Lane {
    fn slot(&mut self, kind: PageKind) -> &mut Option<InFlight<PageOutcome>> {
        match kind {
            PageKind::Synchronize => &mut self.synchronize,
            PageKind::LoadNext => &mut self.load_next,
        }
    }

    fn finish(&mut self, kind: PageKind, id: u64) {
        let slot = self.slot(kind);
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
        if self.tail.as_ref().is_some_and(|f| f.id == id) {
            self.tail = None;
        }
    }

    fn is_idle(&self) -> bool {
        self.synchronize.is_none() && self.load_next.is_none() && self.tail.is_none()
    }
}

/// Runs a closure when dropped, including when a flight task panics.
struct OnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Spawn `work` and return a future every caller can await.
fn launch<T, F>(work: F) -> Flight<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T, SyncError>> + Send + 'static,
{
    let handle = tokio::spawn(work);
    async move {
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(SyncError::Interrupted(err.to_string())),
        }
    }
    .boxed()
    .shared()
}

struct Inner {
    store: SharedStore,
    remote: SharedRemote,
    registry: QueryRegistry,
    config: SyncConfig,
    lanes: DashMap<QueryKey, Lane>,
    updates: DashMap<QueryKey, InFlight<LinkOutcome>>,
    next_flight: AtomicU64,
}

/// Fetches remote pages into the local store.
#[derive(Clone)]
pub struct ListUpdater {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ListUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListUpdater")
            .field("lanes", &self.inner.lanes.len())
            .field("updates", &self.inner.updates.len())
            .finish_non_exhaustive()
    }
}

impl ListUpdater {
    pub fn new(
        store: SharedStore,
        remote: SharedRemote,
        registry: QueryRegistry,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                registry,
                config,
                lanes: DashMap::new(),
                updates: DashMap::new(),
                next_flight: AtomicU64::new(1),
            }),
        }
    }

    /// Refresh a query from its first page.
    ///
    /// Entities previously linked to the query are unlinked in the same
    /// transaction that links the fresh page, and the cursor moves past the
    /// page. On failure nothing is committed.
    pub async fn synchronize(&self, query: &Query) -> Result<PageOutcome, SyncError> {
        self.page_flight(PageKind::Synchronize, query).await
    }

    /// Load the page after the query's cursor.
    ///
    /// A query that was never synchronized loads its first page. A query
    /// with nothing left returns an exhausted outcome without a request.
    pub async fn load_next(&self, query: &Query) -> Result<PageOutcome, SyncError> {
        self.page_flight(PageKind::LoadNext, query).await
    }

    /// Ask the remote whether `candidate` matches anything and, if so,
    /// link the returned entities into `record`'s query.
    ///
    /// Concurrent updates for the same candidate share one request.
    pub async fn update(
        &self,
        record: &QueryRecord,
        candidate: &Query,
    ) -> Result<LinkOutcome, SyncError> {
        let candidate_key = candidate.key();
        let flight = match self.inner.updates.entry(candidate_key.clone()) {
            Entry::Occupied(entry) => entry.get().flight.clone(),
            Entry::Vacant(entry) => {
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let inner = Arc::clone(&self.inner);
                let record = record.clone();
                let candidate = candidate.clone();
                let flight = launch(async move {
                    let cleanup = Arc::clone(&inner);
                    let _finish = OnDrop(Some(move || {
                        cleanup
                            .updates
                            .remove_if(&candidate_key, |_, current| current.id == id);
                    }));
                    inner.run_update(&record, &candidate).await
                });
                entry.insert(InFlight {
                    id,
                    flight: flight.clone(),
                });
                flight
            }
        };
        flight.await
    }

    fn page_flight(&self, kind: PageKind, query: &Query) -> Flight<PageOutcome> {
        let key = query.key();
        // The entry guard makes check-and-start atomic for this query.
        let mut lane = self.inner.lanes.entry(key.clone()).or_default();

        if let Some(current) = lane.slot(kind) {
            tracing::debug!(query = %key, kind = ?kind, "Joining in-flight request");
            return current.flight.clone();
        }

        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let previous = lane.tail.as_ref().map(|f| f.flight.clone());
        let inner = Arc::clone(&self.inner);
        let query = query.clone();

        let flight = launch(async move {
            let cleanup = Arc::clone(&inner);
            let lane_key = query.key();
            let _finish = OnDrop(Some(move || cleanup.finish_page(&lane_key, kind, id)));

            if let Some(previous) = previous {
                // Only ordering matters; the earlier flight's callers get its result.
                let _ = previous.await;
            }
            match kind {
                PageKind::Synchronize => inner.run_synchronize(&query).await,
                PageKind::LoadNext => inner.run_load_next(&query).await,
            }
        });

        let in_flight = InFlight {
            id,
            flight: flight.clone(),
        };
        *lane.slot(kind) = Some(in_flight.clone());
        lane.tail = Some(in_flight);
        flight
    }
}

impl Inner {
    fn finish_page(&self, key: &QueryKey, kind: PageKind, id: u64) {
        let idle = match self.lanes.get_mut(key) {
            Some(mut lane) => {
                lane.finish(kind, id);
                lane.is_idle()
            }
            None => false,
        };
        if idle {
            self.lanes.remove_if(key, |_, lane| lane.is_idle());
        }
    }

    /// The query with the page size the remote is actually asked for.
    fn sized(&self, query: &Query) -> Result<Query, SyncError> {
        let mut query = query.clone();
        query.page_size = self.config.effective_page_size(query.page_size);
        query.validate()?;
        Ok(query)
    }

    async fn run_synchronize(&self, query: &Query) -> Result<PageOutcome, SyncError> {
        let query = self.sized(query)?;
        let existing = self.registry.get(&query.key()).await?;
        self.commit_page(query, existing, PageCursor::start(), true)
            .await
    }

    async fn run_load_next(&self, query: &Query) -> Result<PageOutcome, SyncError> {
        let query = self.sized(query)?;
        let key = query.key();

        let Some(record) = self.registry.get(&key).await? else {
            tracing::debug!(query = %key, "No record yet, loading first page");
            return self
                .commit_page(query, None, PageCursor::start(), false)
                .await;
        };

        if record.pagination.is_exhausted() {
            tracing::debug!(query = %key, cursor = record.pagination.cursor.offset, "Query exhausted");
            return Ok(PageOutcome {
                key,
                fetched: 0,
                cursor: record.pagination.cursor,
                has_more: false,
                exhausted: true,
            });
        }

        let from = record.pagination.cursor;
        self.commit_page(query, Some(record), from, false).await
    }

    /// Fetch the page at `from` and commit it with the advanced cursor.
    async fn commit_page(
        &self,
        query: Query,
        record: Option<QueryRecord>,
        from: PageCursor,
        reset: bool,
    ) -> Result<PageOutcome, SyncError> {
        let key = query.key();
        tracing::debug!(query = %key, offset = from.offset, reset, "Requesting page");

        let page = self
            .remote
            .list(PageRequest::at(query.clone(), from))
            .await?;
        if from.is_start() {
            self.remote.update_subscription(&query).await?;
        }

        let now = now_millis();
        let mut record = record.unwrap_or_else(|| QueryRecord::new(query.clone(), now));
        let fetched = page.entities.len();
        record.pagination = record.pagination.after_page(from, fetched, page.has_more);
        record.query = query.clone();
        record.updated_at = now;
        let pagination = record.pagination;

        let mut batch = WriteBatch::new();
        if reset {
            batch.push(WriteOp::UnlinkAll { key: key.clone() });
        }
        link_page(&mut batch, &query.collection, &key, page.entities);
        batch.push(WriteOp::PutQueryRecord { record });

        let summary = self.store.commit(batch).await?;
        tracing::info!(
            query = %key,
            fetched,
            cursor = pagination.cursor.offset,
            has_more = pagination.has_more,
            revision = summary.revision,
            "Committed page"
        );

        Ok(PageOutcome {
            key,
            fetched,
            cursor: pagination.cursor,
            has_more: pagination.has_more,
            exhausted: false,
        })
    }

    async fn run_update(
        &self,
        record: &QueryRecord,
        candidate: &Query,
    ) -> Result<LinkOutcome, SyncError> {
        let page = self
            .remote
            .list(PageRequest::first(candidate.clone()))
            .await?;
        if page.entities.is_empty() {
            return Ok(LinkOutcome {
                key: record.key.clone(),
                linked: Vec::new(),
            });
        }

        self.remote.update_subscription(&record.query).await?;

        let linked: Vec<EntityId> = page.entities.iter().map(|p| p.id.clone()).collect();
        let mut batch = WriteBatch::new();
        link_page(&mut batch, &record.query.collection, &record.key, page.entities);
        batch.push(WriteOp::TouchQueryRecord {
            key: record.key.clone(),
            linked: linked.len() as u64,
        });
        self.store.commit(batch).await?;

        tracing::debug!(query = %record.key, linked = ?linked, "Linked candidate entities");
        Ok(LinkOutcome {
            key: record.key.clone(),
            linked,
        })
    }
}

fn link_page(batch: &mut WriteBatch, collection: &str, key: &QueryKey, page: Vec<EntityPayload>) {
    for payload in page {
        let id = payload.id.clone();
        batch.push(WriteOp::Upsert {
            collection: collection.to_string(),
            payload,
        });
        batch.push(WriteOp::Link {
            collection: collection.to_string(),
            id,
            key: key.clone(),
        });
    }
}
