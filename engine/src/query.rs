//! Queries, their identity, pagination state and durable records.

use crate::{
    error::Result, filter::SortKey, CollectionName, EntityId, Error, Filter, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of entities requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Identity of a query: its collection, filter and sort order.
///
/// Page size and pagination state are deliberately excluded so that two
/// controllers paging the same list share one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    /// Wrap an already canonical key (e.g. read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bounded, ordered request against a remote collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub collection: CollectionName,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    pub page_size: usize,
}

impl Query {
    /// A query over a whole collection with the default page size.
    pub fn new(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            filter: Filter::All,
            sort: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// The identity of this query.
    pub fn key(&self) -> QueryKey {
        let sort = self
            .sort
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        QueryKey(format!("{}?{}#{}", self.collection, self.filter, sort))
    }

    /// Reject queries that cannot be paged.
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(Error::InvalidQuery("collection must not be empty".into()));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidQuery("page size must be positive".into()));
        }
        Ok(())
    }

    /// The query the linker sends to find out whether `id` belongs to this
    /// query: the original filter narrowed to that one entity.
    pub fn candidate_for(&self, id: &EntityId) -> Query {
        Query {
            collection: self.collection.clone(),
            filter: self.filter.clone().and(Filter::id_eq(id.clone())),
            sort: self.sort.clone(),
            page_size: 1,
        }
    }

    /// Local read for everything this query has linked so far.
    pub fn linked_fetch(&self) -> FetchRequest {
        FetchRequest {
            collection: self.collection.clone(),
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            linked_to: Some(self.key()),
        }
    }
}

/// A local read against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub collection: CollectionName,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    /// Restrict to entities linked to this query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_to: Option<QueryKey>,
}

impl FetchRequest {
    /// Every entity of a collection matching a filter, linked or not.
    pub fn matching(collection: impl Into<CollectionName>, filter: Filter) -> Self {
        Self {
            collection: collection.into(),
            filter,
            sort: Vec::new(),
            linked_to: None,
        }
    }
}

/// Offset into a remote result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    pub offset: u64,
}

impl PageCursor {
    /// The beginning of the result set.
    pub fn start() -> Self {
        Self { offset: 0 }
    }

    pub fn is_start(&self) -> bool {
        self.offset == 0
    }

    /// The cursor after a page of `count` entities.
    pub fn advance(self, count: usize) -> Self {
        Self {
            offset: self.offset + count as u64,
        }
    }
}

/// Session pagination state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Where the next page starts
    pub cursor: PageCursor,
    /// Pages committed since the last synchronize
    pub pages_loaded: u32,
    /// Whether the remote reported more results past the cursor
    pub has_more: bool,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            cursor: PageCursor::start(),
            pages_loaded: 0,
            has_more: true,
        }
    }
}

impl Pagination {
    /// State after committing a page fetched at `from`.
    pub fn after_page(self, from: PageCursor, count: usize, has_more: bool) -> Self {
        let pages_loaded = if from.is_start() {
            1
        } else {
            self.pages_loaded + 1
        };
        Self {
            cursor: from.advance(count),
            pages_loaded,
            has_more: has_more && count > 0,
        }
    }

    /// Whether `load_next` has anything left to fetch.
    pub fn is_exhausted(&self) -> bool {
        self.pages_loaded > 0 && !self.has_more
    }
}

/// The durable form of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub key: QueryKey,
    pub query: Query,
    #[serde(default)]
    pub pagination: Pagination,
    /// Entities folded in by the linker over the record's lifetime
    #[serde(default)]
    pub linked_count: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl QueryRecord {
    pub fn new(query: Query, timestamp: Timestamp) -> Self {
        Self {
            key: query.key(),
            query,
            pagination: Pagination::default(),
            linked_count: 0,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Query {
        Query::new("channels")
            .filter(Filter::contains("members", "u1"))
            .sort_by(SortKey::desc("last_message_at"))
    }

    #[test]
    fn key_ignores_page_size() {
        let a = channels().page_size(10);
        let b = channels().page_size(50);
        assert_eq!(a.key(), b.key());
        assert_eq!(
            a.key().as_str(),
            r#"channels?contains(members,"u1")#-last_message_at"#
        );
    }

    #[test]
    fn key_depends_on_filter_and_sort() {
        let base = channels();
        let other_filter = base.clone().filter(Filter::All);
        let other_sort = base.clone().sort_by(SortKey::asc("name"));
        assert_ne!(base.key(), other_filter.key());
        assert_ne!(base.key(), other_sort.key());
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        assert!(channels().validate().is_ok());
        assert!(matches!(
            channels().page_size(0).validate(),
            Err(Error::InvalidQuery(_))
        ));
        assert!(Query::new("").validate().is_err());
    }

    #[test]
    fn candidate_narrows_to_entity() {
        let q = channels();
        let candidate = q.candidate_for(&"c9".to_string());
        assert_eq!(candidate.page_size, 1);
        assert_eq!(
            candidate.filter,
            Filter::contains("members", "u1").and(Filter::id_eq("c9"))
        );
        assert_ne!(candidate.key(), q.key());
    }

    #[test]
    fn pagination_advances() {
        let p = Pagination::default();
        assert!(!p.is_exhausted());

        let p = p.after_page(PageCursor::start(), 20, true);
        assert_eq!(p.cursor.offset, 20);
        assert_eq!(p.pages_loaded, 1);

        let p = p.after_page(p.cursor, 5, false);
        assert_eq!(p.cursor.offset, 25);
        assert_eq!(p.pages_loaded, 2);
        assert!(p.is_exhausted());

        // An empty page ends pagination even if the remote claims more.
        let p = Pagination::default().after_page(PageCursor::start(), 0, true);
        assert!(p.is_exhausted());
    }

    #[test]
    fn record_roundtrip() {
        let record = QueryRecord::new(channels(), 1000);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: QueryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
