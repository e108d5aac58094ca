//! Linking locally created entities into the queries they belong to.
//!
//! A locally created entity starts out linkage-pending: it is in the store
//! but no query shows it, because only the remote can say which queries it
//! matches. The [`QueryLinker`] claims pending entities and asks the remote,
//! once per registered query of the same collection, whether the query's
//! filter narrowed to that entity matches. Confirmed entities are linked
//! through [`ListUpdater::update`].

use crate::error::{LinkageFailure, StoreError};
use crate::registry::QueryRegistry;
use crate::store::SharedStore;
use crate::updater::ListUpdater;
use futures::future::join_all;
use listsync_engine::{
    CollectionName, CommitSummary, Entity, EntityId, QueryKey, QueryRecord, WriteBatch, WriteOp,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;

/// Reports buffered per report subscriber.
const REPORT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkerState {
    /// Not watching the store; cycles only run on demand
    Idle,
    /// Waiting for commits that create pending entities
    Observing,
    /// A cycle is running
    Resolving,
}

/// Outcome of one linkage cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkReport {
    /// Pending entities this cycle claimed
    pub claimed: Vec<EntityId>,
    /// (entity, query) pairs the remote confirmed
    pub linked: Vec<(EntityId, QueryKey)>,
    /// Pairs the remote said do not match
    pub unmatched: usize,
    pub failures: Vec<LinkageFailure>,
}

impl LinkReport {
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

struct Inner {
    store: SharedStore,
    registry: QueryRegistry,
    updater: ListUpdater,
    state: watch::Sender<LinkerState>,
    reports: broadcast::Sender<LinkReport>,
    observing: AtomicBool,
    cycles: AtomicUsize,
}

/// Marks a cycle as running until dropped, even if the cycle is aborted.
struct Running<'a>(&'a Inner);

impl<'a> Running<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.cycles.fetch_add(1, Ordering::SeqCst);
        inner.settle();
        Self(inner)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.cycles.fetch_sub(1, Ordering::SeqCst);
        self.0.settle();
    }
}

/// Resolves linkage-pending entities.
pub struct QueryLinker {
    inner: Arc<Inner>,
    task: Option<AbortHandle>,
}

impl std::fmt::Debug for QueryLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLinker")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl QueryLinker {
    /// Create an idle linker.
    pub fn new(store: SharedStore, registry: QueryRegistry, updater: ListUpdater) -> Self {
        let (state, _) = watch::channel(LinkerState::Idle);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                updater,
                state,
                reports,
                observing: AtomicBool::new(false),
                cycles: AtomicUsize::new(0),
            }),
            task: None,
        }
    }

    /// Create a linker and start observing the store.
    pub fn spawn(store: SharedStore, registry: QueryRegistry, updater: ListUpdater) -> Self {
        let mut linker = Self::new(store, registry, updater);
        linker.start();
        linker
    }

    /// Watch the store and run a cycle whenever a commit creates pending
    /// entities. Entities already pending are resolved right away.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let commits = self.inner.store.subscribe();
        self.inner.observing.store(true, Ordering::SeqCst);
        self.inner.settle();

        let inner = Arc::clone(&self.inner);
        self.task = Some(tokio::spawn(inner.run(commits)).abort_handle());
        tracing::info!("Query linker started");
    }

    /// Stop watching the store. Updates already sent to the remote still land.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.inner.observing.store(false, Ordering::SeqCst);
            self.inner.settle();
            tracing::info!("Query linker stopped");
        }
    }

    pub fn state(&self) -> LinkerState {
        *self.inner.state.borrow()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<LinkerState> {
        self.inner.state.subscribe()
    }

    /// Receive the report of every later cycle that claimed something.
    pub fn reports(&self) -> broadcast::Receiver<LinkReport> {
        self.inner.reports.subscribe()
    }

    /// Run one cycle now.
    pub async fn resolve_pending(&self) -> Result<LinkReport, StoreError> {
        self.inner.resolve().await
    }
}

impl Drop for QueryLinker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut commits: broadcast::Receiver<CommitSummary>) {
        self.resolve_logged().await;

        loop {
            match commits.recv().await {
                Ok(summary) if summary.created_pending.is_empty() => continue,
                Ok(summary) => {
                    tracing::debug!(
                        revision = summary.revision,
                        created = summary.created_pending.len(),
                        "Pending entities created"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Linker lagged behind commits");
                }
                Err(RecvError::Closed) => break,
            }
            self.resolve_logged().await;
        }
    }

    async fn resolve_logged(&self) {
        if let Err(err) = self.resolve().await {
            tracing::warn!(error = %err, "Linkage cycle failed");
        }
    }

    /// Publish the resting state for the current mode.
    fn settle(&self) {
        let state = if self.cycles.load(Ordering::SeqCst) > 0 {
            LinkerState::Resolving
        } else if self.observing.load(Ordering::SeqCst) {
            LinkerState::Observing
        } else {
            LinkerState::Idle
        };
        self.state.send_replace(state);
    }

    async fn resolve(&self) -> Result<LinkReport, StoreError> {
        let report = {
            let _running = Running::enter(self);
            self.cycle().await?
        };
        if !report.is_empty() {
            tracing::info!(
                claimed = report.claimed.len(),
                linked = report.linked.len(),
                failed = report.failures.len(),
                "Linkage cycle finished"
            );
            let _ = self.reports.send(report.clone());
        }
        Ok(report)
    }

    async fn cycle(&self) -> Result<LinkReport, StoreError> {
        let pending = self.store.pending_linkage().await?;
        if pending.is_empty() {
            return Ok(LinkReport::default());
        }

        // Claiming is one write; a concurrent cycle only gets what it cleared.
        // Entities removed since the read are skipped by the store.
        let claim: WriteBatch = pending
            .iter()
            .map(|entity| WriteOp::ClearLinkagePending {
                collection: entity.collection.clone(),
                id: entity.id.clone(),
            })
            .collect();
        let summary = self.store.commit(claim).await?;
        let cleared: BTreeSet<(CollectionName, EntityId)> =
            summary.cleared_pending.into_iter().collect();
        let claimed: Vec<Entity> = pending
            .into_iter()
            .filter(|entity| cleared.contains(&(entity.collection.clone(), entity.id.clone())))
            .collect();

        let records = self.registry.all().await?;
        let pairs: Vec<(&Entity, &QueryRecord)> = claimed
            .iter()
            .flat_map(|entity| {
                records
                    .iter()
                    .filter(move |record| record.query.collection == entity.collection)
                    .map(move |record| (entity, record))
            })
            .collect();

        tracing::debug!(
            claimed = claimed.len(),
            queries = records.len(),
            pairs = pairs.len(),
            "Resolving linkage"
        );

        let results = join_all(pairs.into_iter().map(|(entity, record)| async move {
            let candidate = record.query.candidate_for(&entity.id);
            let result = self.updater.update(record, &candidate).await;
            (entity.id.clone(), record.key.clone(), result)
        }))
        .await;

        let mut report = LinkReport {
            claimed: claimed.iter().map(|e| e.id.clone()).collect(),
            ..LinkReport::default()
        };
        for (entity_id, query_key, result) in results {
            match result {
                Ok(outcome) if outcome.is_linked() => report.linked.push((entity_id, query_key)),
                Ok(_) => report.unmatched += 1,
                Err(error) => {
                    let failure = LinkageFailure {
                        entity_id,
                        query_key,
                        error,
                    };
                    tracing::warn!(
                        entity_id = %failure.entity_id,
                        query = %failure.query_key,
                        error = %failure.error,
                        "Linkage update failed"
                    );
                    report.failures.push(failure);
                }
            }
        }
        Ok(report)
    }
}
