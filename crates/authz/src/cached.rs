use crate::error::Result;
use crate::keys::check_request_cache_key;
use crate::resolver::CheckResolver;
use async_trait::async_trait;
use rebac_cache::{CheckCache, CheckCacheConfig, CheckCacheEntry};
use rebac_models::{ConsistencyPreference, ResolveCheckRequest, ResolveCheckResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, Instrument};

/// Caching front of the resolver chain: answers a check from the
/// sub-problem cache when a fresh entry exists, otherwise delegates and
/// stores the result. Sub-checks dispatched by the delegate come back
/// through here, so inner sub-problems are memoized too.
pub struct CachedCheckResolver {
    delegate: RwLock<Arc<dyn CheckResolver>>,
    cache: CheckCache,
    owns_cache: bool,
    total_count: AtomicU64,
    hit_count: AtomicU64,
}

impl CachedCheckResolver {
    pub fn new(delegate: Arc<dyn CheckResolver>, config: CheckCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            delegate: RwLock::new(delegate),
            cache: CheckCache::new(config),
            owns_cache: true,
            total_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
        })
    }

    /// Wrap a caller-managed cache. `close` will not stop it.
    pub fn with_existing_cache(delegate: Arc<dyn CheckResolver>, cache: CheckCache) -> Arc<Self> {
        Arc::new(Self {
            delegate: RwLock::new(delegate),
            cache,
            owns_cache: false,
            total_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        *self.delegate.write().expect("delegate lock poisoned") = delegate;
    }

    pub fn delegate(&self) -> Arc<dyn CheckResolver> {
        self.delegate.read().expect("delegate lock poisoned").clone()
    }

    /// `(check_cache_total_count, check_cache_hit_count)`.
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.total_count.load(Ordering::Relaxed),
            self.hit_count.load(Ordering::Relaxed),
        )
    }

    /// Release the cache if this resolver owns it.
    pub async fn close(&self) {
        if self.owns_cache {
            self.cache.stop().await;
        }
    }
}

#[async_trait]
impl CheckResolver for CachedCheckResolver {
    async fn resolve_check(&self, req: ResolveCheckRequest) -> Result<ResolveCheckResponse> {
        let span = tracing::debug_span!(
            "resolve_check",
            tuple = %req.tuple_key,
            cached = tracing::field::Empty,
        );
        async move {
            let key = check_request_cache_key(&req)?;

            if req.consistency == ConsistencyPreference::HigherConsistency {
                tracing::Span::current().record("cached", false);
                return self.delegate().resolve_check(req).await;
            }

            self.total_count.fetch_add(1, Ordering::Relaxed);
            if let Some(entry) = self.cache.get(&key).await {
                if entry.is_fresh(req.last_cache_invalidation) {
                    self.hit_count.fetch_add(1, Ordering::Relaxed);
                    tracing::Span::current().record("cached", true);
                    debug!(%key, "check answered from cache");
                    // Hand out a copy, never the stored entry.
                    return Ok(entry.response.clone());
                }
            }

            tracing::Span::current().record("cached", false);
            let response = self.delegate().resolve_check(req).await?;
            self.cache
                .insert(key, CheckCacheEntry::new(response.clone()))
                .await;
            Ok(response)
        }
        .instrument(span)
        .await
    }
}
