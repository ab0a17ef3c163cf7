//! Bounded, TTL'd in-process cache for resolved check sub-problems.

pub mod check_cache;

pub use check_cache::{CheckCache, CheckCacheConfig, CheckCacheEntry};
