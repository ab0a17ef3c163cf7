use crate::error::Result;
use crate::reader::{ReadStartingWithUserFilter, ReadUsersetTuplesFilter, TupleReader, TupleStream};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use rebac_models::{StoredTuple, TupleKey};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-request overlay composing contextual tuples with a storage backend.
/// Contextual tuples are additive: point lookups consult the overlay first,
/// scans produce overlay matches before the storage stream, de-duplicated
/// by `(object, relation, user)`. The overlay never reaches the backend.
pub struct ContextualTupleReader {
    inner: Arc<dyn TupleReader>,
    /// Indexed by `(object, relation)` for O(1) merge with scans.
    by_object_relation: HashMap<(String, String), Vec<StoredTuple>>,
    overlay: Vec<StoredTuple>,
}

impl ContextualTupleReader {
    pub fn new(inner: Arc<dyn TupleReader>, contextual_tuples: &[TupleKey]) -> Self {
        let mut by_object_relation: HashMap<(String, String), Vec<StoredTuple>> = HashMap::new();
        let mut overlay = Vec::with_capacity(contextual_tuples.len());
        let mut seen = HashSet::new();

        for key in contextual_tuples {
            if !seen.insert(key.to_string()) {
                continue;
            }
            let tuple = StoredTuple::new(key.clone());
            by_object_relation
                .entry((key.object.to_string(), key.relation.clone()))
                .or_default()
                .push(tuple.clone());
            overlay.push(tuple);
        }

        Self {
            inner,
            by_object_relation,
            overlay,
        }
    }

    fn overlay_for(&self, object: &str, relation: &str) -> &[StoredTuple] {
        self.by_object_relation
            .get(&(object.to_string(), relation.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Chain overlay matches ahead of the storage stream, dropping storage
    /// tuples already produced from the overlay.
    fn merge(&self, matches: Vec<StoredTuple>, storage: TupleStream) -> TupleStream {
        let mut seen: HashSet<String> = matches.iter().map(|t| t.key.to_string()).collect();
        let deduped = storage.filter_map(move |item| {
            let keep = match &item {
                Ok(tuple) => seen.insert(tuple.key.to_string()),
                Err(_) => true,
            };
            async move { keep.then_some(item) }
        });
        Box::pin(stream::iter(matches.into_iter().map(Ok)).chain(deduped))
    }
}

#[async_trait]
impl TupleReader for ContextualTupleReader {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> Result<Option<StoredTuple>> {
        let hit = self
            .overlay_for(&key.object.to_string(), &key.relation)
            .iter()
            .find(|t| t.key == *key)
            .cloned();
        if hit.is_some() {
            return Ok(hit);
        }
        self.inner.read_user_tuple(store_id, key).await
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: ReadUsersetTuplesFilter,
    ) -> Result<TupleStream> {
        let matches: Vec<StoredTuple> = self
            .overlay_for(&filter.object.to_string(), &filter.relation)
            .iter()
            .filter(|t| filter.admits(&t.key.user))
            .cloned()
            .collect();
        let storage = self.inner.read_userset_tuples(store_id, filter).await?;
        Ok(self.merge(matches, storage))
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: ReadStartingWithUserFilter,
    ) -> Result<TupleStream> {
        let matches: Vec<StoredTuple> = self
            .overlay
            .iter()
            .filter(|t| {
                t.key.object.object_type == filter.object_type
                    && t.key.relation == filter.relation
                    && filter.admits(&t.key.user)
            })
            .cloned()
            .collect();
        let storage = self.inner.read_starting_with_user(store_id, filter).await?;
        Ok(self.merge(matches, storage))
    }
}
