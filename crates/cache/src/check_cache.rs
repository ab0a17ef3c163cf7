use chrono::{DateTime, Utc};
use moka::future::Cache;
use rebac_models::ResolveCheckResponse;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CheckCacheConfig {
    /// Maximum number of cached sub-problems.
    pub max_size: u64,
    /// Entries older than this read as absent.
    pub ttl: Duration,
}

impl Default for CheckCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl: Duration::from_secs(10),
        }
    }
}

impl CheckCacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: std::env::var("REBAC_CHECK_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size),
            ttl: std::env::var("REBAC_CHECK_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
        }
    }
}

/// A cached check answer stamped with the instant it was resolved. Freshness
/// against a caller's write fence is judged by the resolver, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCacheEntry {
    pub last_modified: DateTime<Utc>,
    pub response: ResolveCheckResponse,
}

impl CheckCacheEntry {
    pub fn new(response: ResolveCheckResponse) -> Self {
        Self {
            last_modified: Utc::now(),
            response,
        }
    }

    /// Valid only for callers whose last known write happened before this
    /// entry was resolved.
    pub fn is_fresh(&self, last_cache_invalidation: DateTime<Utc>) -> bool {
        self.last_modified > last_cache_invalidation
    }
}

/// Thread-safe bounded cache of check sub-problems, keyed by the request
/// fingerprint string.
#[derive(Clone)]
pub struct CheckCache {
    inner: Cache<String, Arc<CheckCacheEntry>>,
}

impl CheckCache {
    pub fn new(config: CheckCacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(config.max_size)
                .time_to_live(config.ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CheckCacheEntry>> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, entry: CheckCacheEntry) {
        self.inner.insert(key, Arc::new(entry)).await;
    }

    /// Flush pending maintenance work. Idempotent; there is no background
    /// janitor thread to join.
    pub async fn stop(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

impl Default for CheckCache {
    fn default() -> Self {
        Self::new(CheckCacheConfig::default())
    }
}
