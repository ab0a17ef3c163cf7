use crate::tuple::TupleKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Caller-selected trade-off between cache freshness and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyPreference {
    #[default]
    Unspecified,
    MinimizeLatency,
    HigherConsistency,
}

/// One check sub-problem: is `tuple_key.user` allowed `tuple_key.relation`
/// on `tuple_key.object` under the given store and model?
#[derive(Debug, Clone)]
pub struct ResolveCheckRequest {
    pub store_id: String,
    pub model_id: String,
    pub tuple_key: TupleKey,
    /// Per-request overlay tuples, never persisted.
    pub contextual_tuples: Vec<TupleKey>,
    /// Opaque context for conditional relations.
    pub context: HashMap<String, serde_json::Value>,
    /// Strictly increases down each recursion branch.
    pub resolution_depth: u32,
    /// Cache entries stamped at or before this instant are ignored.
    pub last_cache_invalidation: DateTime<Utc>,
    pub consistency: ConsistencyPreference,
    /// Cooperative cancellation scope for the whole resolution tree.
    pub cancellation: CancellationToken,
}

impl ResolveCheckRequest {
    pub fn new(store_id: &str, model_id: &str, tuple_key: TupleKey) -> Self {
        Self {
            store_id: store_id.to_string(),
            model_id: model_id.to_string(),
            tuple_key,
            contextual_tuples: Vec::new(),
            context: HashMap::new(),
            resolution_depth: 0,
            last_cache_invalidation: DateTime::<Utc>::UNIX_EPOCH,
            consistency: ConsistencyPreference::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<TupleKey>) -> Self {
        self.contextual_tuples = tuples;
        self
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyPreference) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_last_cache_invalidation(mut self, at: DateTime<Utc>) -> Self {
        self.last_cache_invalidation = at;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A sub-problem of this request: same store, model and overlays, one
    /// level deeper, asking about a different tuple key.
    pub fn child(&self, tuple_key: TupleKey) -> Self {
        let mut child = self.clone();
        child.tuple_key = tuple_key;
        child.resolution_depth = self.resolution_depth + 1;
        child
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolutionMetadata {
    pub datastore_query_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveCheckResponse {
    pub allowed: bool,
    #[serde(default)]
    pub resolution_metadata: ResolutionMetadata,
}

impl ResolveCheckResponse {
    pub fn new(allowed: bool) -> Self {
        Self {
            allowed,
            resolution_metadata: ResolutionMetadata::default(),
        }
    }

    pub fn with_query_count(mut self, datastore_query_count: u32) -> Self {
        self.resolution_metadata.datastore_query_count = datastore_query_count;
        self
    }
}
