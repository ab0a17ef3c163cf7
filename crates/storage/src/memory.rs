use crate::error::Result;
use crate::reader::{ReadStartingWithUserFilter, ReadUsersetTuplesFilter, TupleReader, TupleStream};
use async_trait::async_trait;
use futures::stream;
use rebac_models::{StoredTuple, TupleKey};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory tuple store, primarily for tests and embedded use. Reads
/// snapshot the matching tuples under the lock and stream the snapshot.
#[derive(Debug, Default)]
pub struct MemoryTupleStore {
    tuples: RwLock<HashMap<String, Vec<StoredTuple>>>,
}

impl MemoryTupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tuple. Duplicate keys are ignored.
    pub fn write(&self, store_id: &str, key: TupleKey) {
        let mut tuples = self.tuples.write().expect("tuple store lock poisoned");
        let store = tuples.entry(store_id.to_string()).or_default();
        if !store.iter().any(|t| t.key == key) {
            tracing::debug!(store_id, %key, "wrote tuple");
            store.push(StoredTuple::new(key));
        }
    }

    pub fn write_all(&self, store_id: &str, keys: impl IntoIterator<Item = TupleKey>) {
        for key in keys {
            self.write(store_id, key);
        }
    }

    pub fn delete(&self, store_id: &str, key: &TupleKey) {
        let mut tuples = self.tuples.write().expect("tuple store lock poisoned");
        if let Some(store) = tuples.get_mut(store_id) {
            store.retain(|t| t.key != *key);
        }
    }

    fn snapshot<F>(&self, store_id: &str, mut keep: F) -> Vec<StoredTuple>
    where
        F: FnMut(&StoredTuple) -> bool,
    {
        self.tuples
            .read()
            .expect("tuple store lock poisoned")
            .get(store_id)
            .map(|store| store.iter().filter(|t| keep(t)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TupleReader for MemoryTupleStore {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> Result<Option<StoredTuple>> {
        Ok(self
            .snapshot(store_id, |t| t.key == *key)
            .into_iter()
            .next())
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: ReadUsersetTuplesFilter,
    ) -> Result<TupleStream> {
        let matches = self.snapshot(store_id, |t| {
            t.key.object == filter.object
                && t.key.relation == filter.relation
                && filter.admits(&t.key.user)
        });
        Ok(Box::pin(stream::iter(matches.into_iter().map(Ok))))
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: ReadStartingWithUserFilter,
    ) -> Result<TupleStream> {
        let matches = self.snapshot(store_id, |t| {
            t.key.object.object_type == filter.object_type
                && t.key.relation == filter.relation
                && filter.admits(&t.key.user)
        });
        Ok(Box::pin(stream::iter(matches.into_iter().map(Ok))))
    }
}
