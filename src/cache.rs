/// Search result cache
///
/// Fronts the hybrid searcher with a bounded TTL cache keyed on the
/// normalized request. The catalog tags every key with its mutation epoch and
/// clears the cache on each mutation, so a cached response never outlives the
/// corpus it was computed from, even when its search was still in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::search::SearchResponse;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Cache failures are never fatal; callers log and fall through to a live search.
#[async_trait]
pub trait SearchCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Arc<SearchResponse>>, CacheError>;

    async fn put(&self, key: String, response: Arc<SearchResponse>) -> Result<(), CacheError>;

    async fn invalidate_all(&self) -> Result<(), CacheError>;
}

/// In-process cache backed by moka (TinyLFU admission, per-entry TTL).
pub struct MokaSearchCache {
    cache: Cache<String, Arc<SearchResponse>>,
}

impl MokaSearchCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        MokaSearchCache { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.ttl_secs))
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl SearchCache for MokaSearchCache {
    async fn get(&self, key: &str) -> Result<Option<Arc<SearchResponse>>, CacheError> {
        Ok(self.cache.get(key))
    }

    async fn put(&self, key: String, response: Arc<SearchResponse>) -> Result<(), CacheError> {
        self.cache.insert(key, response);
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        Ok(())
    }
}
