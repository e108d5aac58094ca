//! Configuration management for the sync runtime.

use std::env;
use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Page size for queries built with [`SyncConfig::query`]
    pub default_page_size: usize,
    /// Upper bound applied to every page request
    pub max_page_size: usize,
    /// Change batches buffered per observer before it applies backpressure
    pub observer_buffer: usize,
    /// Where `MemoryStore` persists its snapshot, if anywhere
    pub snapshot_path: Option<PathBuf>,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_page_size: listsync_engine::DEFAULT_PAGE_SIZE,
            max_page_size: 100,
            observer_buffer: 64,
            snapshot_path: None,
            log_filter: "listsync=info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_page_size = read_usize("LISTSYNC_PAGE_SIZE", defaults.default_page_size)?;
        let max_page_size = read_usize("LISTSYNC_MAX_PAGE_SIZE", defaults.max_page_size)?;
        let observer_buffer = read_usize("LISTSYNC_OBSERVER_BUFFER", defaults.observer_buffer)?;

        if default_page_size == 0 || max_page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if observer_buffer == 0 {
            return Err(ConfigError::ZeroObserverBuffer);
        }

        let snapshot_path = env::var("LISTSYNC_SNAPSHOT_PATH").ok().map(PathBuf::from);
        let log_filter = env::var("LISTSYNC_LOG").unwrap_or(defaults.log_filter);

        Ok(Self {
            default_page_size,
            max_page_size,
            observer_buffer,
            snapshot_path,
            log_filter,
        })
    }

    /// A query over `collection` paged by the configured default.
    pub fn query(&self, collection: impl Into<String>) -> listsync_engine::Query {
        listsync_engine::Query::new(collection).page_size(self.default_page_size)
    }

    /// Page size actually requested for a query. Zero is left for
    /// validation to reject.
    pub fn effective_page_size(&self, requested: usize) -> usize {
        requested.min(self.max_page_size)
    }
}

fn read_usize(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("page sizes must be positive")]
    ZeroPageSize,

    #[error("LISTSYNC_OBSERVER_BUFFER must be positive")]
    ZeroObserverBuffer,
}
