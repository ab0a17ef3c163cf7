use crate::cached::CachedCheckResolver;
use crate::checker::LocalChecker;
use crate::error::{CheckError, Result};
use async_trait::async_trait;
use rebac_cache::{CheckCache, CheckCacheConfig};
use rebac_models::{AuthorizationModel, ResolveCheckRequest, ResolveCheckResponse, TypeSystem};
use rebac_storage::TupleReader;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// A stage in the check resolution chain.
#[async_trait]
pub trait CheckResolver: Send + Sync {
    async fn resolve_check(&self, req: ResolveCheckRequest) -> Result<ResolveCheckResponse>;
}

#[derive(Debug, Clone)]
pub struct CheckResolverConfig {
    pub max_cache_size: u64,
    pub cache_ttl: Duration,
    pub resolution_depth_limit: u32,
    pub concurrency_limit: usize,
}

impl Default for CheckResolverConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 10_000,
            cache_ttl: Duration::from_secs(10),
            resolution_depth_limit: 25,
            concurrency_limit: 100,
        }
    }
}

impl CheckResolverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_cache_size: std::env::var("REBAC_CHECK_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_cache_size),
            cache_ttl: std::env::var("REBAC_CHECK_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            resolution_depth_limit: std::env::var("REBAC_RESOLUTION_DEPTH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.resolution_depth_limit),
            concurrency_limit: std::env::var("REBAC_CHECK_CONCURRENCY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.concurrency_limit),
        }
    }
}

/// The wired resolver stack for one store's model: a `LocalChecker` whose
/// sub-checks re-enter through a `CachedCheckResolver`, so repeated
/// sub-problems within and across requests are memoized.
pub struct ResolverChain {
    cached: Arc<CachedCheckResolver>,
}

impl ResolverChain {
    pub fn new(
        datastore: Arc<dyn TupleReader>,
        model: Arc<AuthorizationModel>,
        config: CheckResolverConfig,
    ) -> Self {
        Self::build(datastore, model, config, None)
    }

    /// Reuse a caller-managed cache; `close` leaves it running.
    pub fn with_existing_cache(
        datastore: Arc<dyn TupleReader>,
        model: Arc<AuthorizationModel>,
        config: CheckResolverConfig,
        cache: CheckCache,
    ) -> Self {
        Self::build(datastore, model, config, Some(cache))
    }

    fn build(
        datastore: Arc<dyn TupleReader>,
        model: Arc<AuthorizationModel>,
        config: CheckResolverConfig,
        existing_cache: Option<CheckCache>,
    ) -> Self {
        let typesystem = TypeSystem::new(model);
        let checker = LocalChecker::new(datastore, typesystem, &config);
        let base: Arc<dyn CheckResolver> = checker.clone();
        let cached = match existing_cache {
            Some(cache) => CachedCheckResolver::with_existing_cache(base, cache),
            None => CachedCheckResolver::new(
                base,
                CheckCacheConfig {
                    max_size: config.max_cache_size,
                    ttl: config.cache_ttl,
                },
            ),
        };
        let cached_dyn: Arc<dyn CheckResolver> = cached.clone();
        let front: Weak<dyn CheckResolver> = Arc::downgrade(&cached_dyn);
        checker.set_delegate(front);
        Self { cached }
    }

    pub async fn check(&self, req: ResolveCheckRequest) -> Result<ResolveCheckResponse> {
        self.cached.resolve_check(req).await
    }

    /// Bound the whole resolution tree by a deadline.
    pub async fn check_with_timeout(
        &self,
        req: ResolveCheckRequest,
        timeout: Duration,
    ) -> Result<ResolveCheckResponse> {
        let token = req.cancellation.clone();
        match tokio::time::timeout(timeout, self.cached.resolve_check(req)).await {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                Err(CheckError::DeadlineExceeded)
            }
        }
    }

    /// The cached front of the chain, for callers composing further
    /// stages.
    pub fn resolver(&self) -> Arc<CachedCheckResolver> {
        self.cached.clone()
    }

    /// `(check_cache_total_count, check_cache_hit_count)`.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cached.cache_stats()
    }

    pub async fn close(&self) {
        self.cached.close().await;
    }
}

#[async_trait]
impl CheckResolver for ResolverChain {
    async fn resolve_check(&self, req: ResolveCheckRequest) -> Result<ResolveCheckResponse> {
        self.cached.resolve_check(req).await
    }
}
