//! Live observation of a query's local results.
//!
//! A [`StoreObserver`] keeps the list of entities linked to one query and
//! matching its filter. After every relevant store commit it refetches the
//! list, diffs it against the last emitted state and maps the changes onto
//! list positions. When the mapping is ambiguous the batch carries no
//! positions and the consumer reloads from `items`.

use crate::config::SyncConfig;
use crate::error::StoreError;
use crate::store::SharedStore;
use listsync_engine::{
    diff, ChangeEvent, ChangeSetMapper, CommitSummary, Entity, PositionSet, Query, Revision,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::AbortHandle;

/// Ordered snapshot of a query's results.
pub type Items = Arc<Vec<Entity>>;

/// One step from the previous list state to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    /// Store revision the new state was read at
    pub revision: Revision,
    pub changes: Vec<ChangeEvent>,
    /// `None` when the changes cannot be applied incrementally
    pub positions: Option<PositionSet>,
    /// First batch of a subscription: every item is an insert
    pub reset: bool,
    /// The list after this batch
    pub items: Items,
}

impl ChangeBatch {
    /// Whether the consumer has to reload instead of applying positions.
    pub fn requires_reload(&self) -> bool {
        self.positions.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Changes(ChangeBatch),
    /// A refetch failed; the last emitted state still stands
    Error(StoreError),
}

/// Handle to a running observation.
///
/// Dropping it stops the observation.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<ObserverEvent>,
    items: watch::Receiver<Items>,
    task: AbortHandle,
}

impl Subscription {
    /// Next event, or `None` once the observation stopped.
    pub async fn recv(&mut self) -> Option<ObserverEvent> {
        self.events.recv().await
    }

    /// Next change batch, skipping errors.
    pub async fn next_batch(&mut self) -> Option<ChangeBatch> {
        while let Some(event) = self.events.recv().await {
            if let ObserverEvent::Changes(batch) = event {
                return Some(batch);
            }
        }
        None
    }

    /// The last emitted list.
    pub fn current_items(&self) -> Items {
        self.items.borrow().clone()
    }

    pub fn stop(&mut self) {
        self.task.abort();
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Observes one query in the local store.
pub struct StoreObserver {
    store: SharedStore,
    query: Query,
    buffer: usize,
    items: Arc<watch::Sender<Items>>,
    active: Option<AbortHandle>,
}

impl StoreObserver {
    pub fn new(store: SharedStore, query: Query, config: &SyncConfig) -> Self {
        let (items, _) = watch::channel(Items::default());
        Self {
            store,
            query,
            buffer: config.observer_buffer.max(1),
            items: Arc::new(items),
            active: None,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The last emitted list.
    pub fn current_items(&self) -> Items {
        self.items.borrow().clone()
    }

    /// Start observing.
    ///
    /// The first event is a reset batch with the current list. A previous
    /// observation from this observer is stopped. A failed initial fetch is
    /// returned here instead of as an event.
    pub async fn start_observing(&mut self) -> Result<Subscription, StoreError> {
        self.stop();

        // Subscribe before reading so no commit falls between the two.
        let commits = self.store.subscribe();
        let (revision, initial) = self.store.fetch_at(&self.query.linked_fetch()).await?;
        let initial = Arc::new(initial);

        let (events, receiver) = mpsc::channel(self.buffer);
        let reset = ChangeBatch {
            revision,
            changes: initial
                .iter()
                .enumerate()
                .map(|(index, item)| ChangeEvent::insert(item.clone(), index))
                .collect(),
            positions: Some(PositionSet {
                insert: (0..initial.len()).collect(),
                ..PositionSet::default()
            }),
            reset: true,
            items: initial.clone(),
        };
        self.items.send_replace(initial.clone());
        // A fresh channel always has room for the first event.
        let _ = events.try_send(ObserverEvent::Changes(reset));

        let worker = Worker {
            store: self.store.clone(),
            query: self.query.clone(),
            items: self.items.clone(),
            events,
            previous: initial,
            revision,
        };
        let task = tokio::spawn(worker.run(commits)).abort_handle();
        self.active = Some(task.clone());

        tracing::debug!(query = %self.query.key(), revision, "Started observing");
        Ok(Subscription {
            events: receiver,
            items: self.items.subscribe(),
            task,
        })
    }

    /// Stop the current observation, if any.
    pub fn stop(&mut self) {
        if let Some(task) = self.active.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for StoreObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreObserver")
            .field("query", &self.query.key())
            .field("active", &self.active.is_some())
            .finish_non_exhaustive()
    }
}

struct Worker {
    store: SharedStore,
    query: Query,
    items: Arc<watch::Sender<Items>>,
    events: mpsc::Sender<ObserverEvent>,
    previous: Items,
    revision: Revision,
}

impl Worker {
    async fn run(mut self, mut commits: broadcast::Receiver<CommitSummary>) {
        loop {
            let mut relevant = match commits.recv().await {
                Ok(summary) => self.note(&summary),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(query = %self.query.key(), skipped, "Observer lagged, refetching");
                    true
                }
                Err(RecvError::Closed) => break,
            };

            // Coalesce whatever else already landed.
            loop {
                match commits.try_recv() {
                    Ok(summary) => relevant |= self.note(&summary),
                    Err(TryRecvError::Lagged(_)) => relevant = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }

            if relevant && !self.refresh().await {
                break;
            }
        }
        tracing::debug!(query = %self.query.key(), "Observer stopped");
    }

    fn note(&mut self, summary: &CommitSummary) -> bool {
        self.revision = self.revision.max(summary.revision);
        summary.touches(&self.query.collection)
    }

    /// Refetch and emit. Returns false once nobody is listening.
    async fn refresh(&mut self) -> bool {
        let current = match self.store.fetch_at(&self.query.linked_fetch()).await {
            Ok((revision, current)) => {
                self.revision = self.revision.max(revision);
                current
            }
            Err(err) => {
                tracing::warn!(query = %self.query.key(), error = %err, "Observer refetch failed");
                return self.events.send(ObserverEvent::Error(err)).await.is_ok();
            }
        };

        let changes = diff(&self.previous, &current);
        if changes.is_empty() {
            return !self.events.is_closed();
        }

        let positions = ChangeSetMapper::new(self.previous.len(), current.len()).map(&changes);
        if positions.is_none() {
            tracing::warn!(
                query = %self.query.key(),
                revision = self.revision,
                "Ambiguous change batch, consumer must reload"
            );
        }

        let items = Arc::new(current);
        self.items.send_replace(items.clone());
        self.previous = items.clone();

        let batch = ChangeBatch {
            revision: self.revision,
            changes,
            positions,
            reset: false,
            items,
        };
        self.events.send(ObserverEvent::Changes(batch)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PersistentStore};
    use listsync_engine::{EntityPayload, SortKey, WriteBatch, WriteOp};
    use serde_json::json;

    fn query() -> Query {
        Query::new("channels").sort_by(SortKey::asc("rank"))
    }

    fn linked(id: &str, rank: i64) -> Vec<WriteOp> {
        vec![
            WriteOp::Upsert {
                collection: "channels".into(),
                payload: EntityPayload::new(id, json!({"rank": rank})),
            },
            WriteOp::Link {
                collection: "channels".into(),
                id: id.into(),
                key: query().key(),
            },
        ]
    }

    #[tokio::test]
    async fn first_event_is_a_reset() {
        let store = Arc::new(MemoryStore::new());
        store
            .commit(linked("a", 1).into_iter().chain(linked("b", 2)).collect())
            .await
            .unwrap();

        let mut observer = StoreObserver::new(store.clone(), query(), &SyncConfig::default());
        let mut subscription = observer.start_observing().await.unwrap();

        let batch = subscription.next_batch().await.unwrap();
        assert!(batch.reset);
        assert_eq!(batch.revision, 1);
        assert_eq!(batch.positions.unwrap().insert.len(), 2);
        assert_eq!(observer.current_items().len(), 2);
    }

    #[tokio::test]
    async fn reset_revision_matches_the_items_it_shows() {
        let store = Arc::new(MemoryStore::new());
        store.commit(linked("a", 1).into_iter().collect()).await.unwrap();
        store
            .commit(WriteBatch::new().with(WriteOp::Upsert {
                collection: "messages".into(),
                payload: EntityPayload::new("m1", json!({"text": "hi"})),
            }))
            .await
            .unwrap();

        let mut observer = StoreObserver::new(store.clone(), query(), &SyncConfig::default());
        let mut subscription = observer.start_observing().await.unwrap();

        let batch = subscription.next_batch().await.unwrap();
        assert_eq!(batch.revision, store.revision().await.unwrap());
        assert_eq!(batch.items.len(), 1);
    }

    #[tokio::test]
    async fn unlinked_entities_are_invisible() {
        let store = Arc::new(MemoryStore::new());
        let mut observer = StoreObserver::new(store.clone(), query(), &SyncConfig::default());
        let mut subscription = observer.start_observing().await.unwrap();
        subscription.next_batch().await.unwrap();

        store
            .commit(WriteBatch::new().with(WriteOp::Upsert {
                collection: "channels".into(),
                payload: EntityPayload::new("stray", json!({"rank": 0})),
            }))
            .await
            .unwrap();
        store.commit(linked("a", 1).into_iter().collect()).await.unwrap();

        let batch = subscription.next_batch().await.unwrap();
        let ids: Vec<_> = batch.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn failed_refetch_keeps_last_items() {
        let store = Arc::new(MemoryStore::new());
        store.commit(linked("a", 1).into_iter().collect()).await.unwrap();

        let mut observer = StoreObserver::new(store.clone(), query(), &SyncConfig::default());
        let mut subscription = observer.start_observing().await.unwrap();
        subscription.next_batch().await.unwrap();

        store.fail_next_fetch(StoreError::Unavailable("busy".into()));
        store.commit(linked("b", 2).into_iter().collect()).await.unwrap();

        match subscription.recv().await.unwrap() {
            ObserverEvent::Error(StoreError::Unavailable(_)) => {}
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(subscription.current_items().len(), 1);
    }

    #[tokio::test]
    async fn restart_replaces_previous_subscription() {
        let store = Arc::new(MemoryStore::new());
        let mut observer = StoreObserver::new(store.clone(), query(), &SyncConfig::default());

        let mut first = observer.start_observing().await.unwrap();
        first.next_batch().await.unwrap();
        let _second = observer.start_observing().await.unwrap();

        store.commit(linked("a", 1).into_iter().collect()).await.unwrap();
        assert!(first.next_batch().await.is_none());
    }
}
