//! In-memory remote for tests and demos.
//!
//! Serves pages out of a seeded dataset using the same filter and sort
//! semantics as the local store, records every request, and can inject
//! failures and latency.

use super::{Page, PageRequest, RemoteApi, RemoteError};
use async_trait::async_trait;
use listsync_engine::{
    compare_entities, CollectionName, Entity, EntityId, EntityPayload, Query, QueryKey,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// In-memory [`RemoteApi`].
///
/// Cloning shares the underlying dataset and counters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    inner: Arc<Mutex<RemoteState>>,
}

#[derive(Debug, Default)]
struct RemoteState {
    collections: HashMap<CollectionName, BTreeMap<EntityId, EntityPayload>>,
    requests: Vec<PageRequest>,
    subscriptions: Vec<QueryKey>,
    latency: Option<Duration>,
    fail_next_list: VecDeque<RemoteError>,
    fail_next_subscription: Option<RemoteError>,
    failing_queries: HashMap<QueryKey, RemoteError>,
}

impl InMemoryRemote {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        // A panic while holding the lock leaves plain data behind; keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace entities on the server side.
    pub fn seed(&self, collection: &str, payloads: impl IntoIterator<Item = EntityPayload>) {
        let mut state = self.state();
        let target = state.collections.entry(collection.to_string()).or_default();
        for payload in payloads {
            target.insert(payload.id.clone(), payload);
        }
    }

    /// Insert or replace a single entity on the server side.
    pub fn put(&self, collection: &str, payload: EntityPayload) {
        self.seed(collection, std::iter::once(payload));
    }

    /// Delete an entity on the server side.
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        self.state()
            .collections
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some()
    }

    /// Number of `list` calls served or failed so far.
    pub fn list_calls(&self) -> usize {
        self.state().requests.len()
    }

    /// Every `list` request, in arrival order.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.state().requests.clone()
    }

    /// Every query a subscription update was accepted for, in order.
    pub fn subscriptions(&self) -> Vec<QueryKey> {
        self.state().subscriptions.clone()
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Cause the next `list` call to fail with the given error.
    pub fn fail_next_list(&self, error: RemoteError) {
        self.state().fail_next_list.push_back(error);
    }

    /// Cause the next `update_subscription` call to fail.
    pub fn fail_next_subscription(&self, error: RemoteError) {
        self.state().fail_next_subscription = Some(error);
    }

    /// Fail every `list` call for this query until cleared.
    pub fn fail_query(&self, key: QueryKey, error: RemoteError) {
        self.state().failing_queries.insert(key, error);
    }

    /// Stop failing a query.
    pub fn clear_failure(&self, key: &QueryKey) {
        self.state().failing_queries.remove(key);
    }

    fn page(&self, request: &PageRequest) -> Page {
        let state = self.state();
        let query = &request.query;
        let Some(collection) = state.collections.get(&query.collection) else {
            return Page::default();
        };

        let mut matching: Vec<Entity> = collection
            .values()
            .map(|p| Entity::from_payload(&query.collection, p.clone(), 0))
            .filter(|e| query.filter.matches(e))
            .collect();
        matching.sort_by(|a, b| compare_entities(a, b, &query.sort));

        let offset = usize::try_from(request.cursor.offset).unwrap_or(usize::MAX);
        let entities: Vec<EntityPayload> = matching
            .iter()
            .skip(offset)
            .take(query.page_size)
            .map(|e| collection[&e.id].clone())
            .collect();
        let has_more = offset.saturating_add(entities.len()) < matching.len();

        Page { entities, has_more }
    }
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    async fn list(&self, request: PageRequest) -> Result<Page, RemoteError> {
        let (latency, failure) = {
            let mut state = self.state();
            state.requests.push(request.clone());
            let failure = state.fail_next_list.pop_front().or_else(|| {
                state
                    .failing_queries
                    .get(&request.query.key())
                    .cloned()
            });
            (state.latency, failure)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = failure {
            tracing::debug!(query = %request.query.key(), %error, "in-memory remote failing list");
            return Err(error);
        }

        Ok(self.page(&request))
    }

    async fn update_subscription(&self, query: &Query) -> Result<(), RemoteError> {
        let mut state = self.state();
        if let Some(error) = state.fail_next_subscription.take() {
            return Err(error);
        }
        state.subscriptions.push(query.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_engine::{Filter, SortKey};
    use serde_json::json;

    fn seeded() -> InMemoryRemote {
        let remote = InMemoryRemote::new();
        remote.seed(
            "channels",
            (0..5).map(|i| EntityPayload::new(format!("c{i}"), json!({"rank": i}))),
        );
        remote
    }

    #[tokio::test]
    async fn pages_in_sort_order() {
        let remote = seeded();
        let query = Query::new("channels")
            .sort_by(SortKey::desc("rank"))
            .page_size(2);

        let first = remote.list(PageRequest::first(query.clone())).await.unwrap();
        let ids: Vec<_> = first.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c4", "c3"]);
        assert!(first.has_more);

        let cursor = listsync_engine::PageCursor { offset: 4 };
        let last = remote.list(PageRequest::at(query, cursor)).await.unwrap();
        assert_eq!(last.entities.len(), 1);
        assert!(!last.has_more);
        assert_eq!(remote.list_calls(), 2);
    }

    #[tokio::test]
    async fn filters_apply() {
        let remote = seeded();
        let query = Query::new("channels").filter(Filter::id_eq("c2"));
        let page = remote.list(PageRequest::first(query)).await.unwrap();
        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.entities[0].id, "c2");

        let missing = Query::new("messages");
        let page = remote.list(PageRequest::first(missing)).await.unwrap();
        assert!(page.entities.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = seeded();
        let query = Query::new("channels");

        remote.fail_next_list(RemoteError::Transport("offline".into()));
        let result = remote.list(PageRequest::first(query.clone())).await;
        assert_eq!(result, Err(RemoteError::Transport("offline".into())));
        assert!(remote.list(PageRequest::first(query.clone())).await.is_ok());

        remote.fail_query(query.key(), RemoteError::Decode("bad".into()));
        assert!(remote.list(PageRequest::first(query.clone())).await.is_err());
        remote.clear_failure(&query.key());
        assert!(remote.list(PageRequest::first(query.clone())).await.is_ok());

        remote.fail_next_subscription(RemoteError::Rejected {
            status: 403,
            message: "forbidden".into(),
        });
        assert!(remote.update_subscription(&query).await.is_err());
        assert!(remote.update_subscription(&query).await.is_ok());
        assert_eq!(remote.subscriptions(), vec![query.key()]);
    }

    #[test]
    fn remove_deletes_server_side() {
        let remote = seeded();
        assert!(remote.remove("channels", "c1"));
        assert!(!remote.remove("channels", "c1"));
    }
}
