#![allow(dead_code)]

use async_trait::async_trait;
use futures::Stream;
use rebac_models::{
    AuthorizationModel, RelationMetadata, RelationReference, Rewrite, StoredTuple, TupleKey,
    TypeDefinition, TypeMetadata,
};
use rebac_storage::{
    MemoryTupleStore, ReadStartingWithUserFilter, ReadUsersetTuplesFilter, TupleReader,
    TupleStream,
};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Route test logs through `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn key(object: &str, relation: &str, user: &str) -> TupleKey {
    TupleKey::parse(object, relation, user).unwrap()
}

pub fn model(id: &str, types: Vec<TypeDefinition>) -> Arc<AuthorizationModel> {
    Arc::new(AuthorizationModel {
        id: id.to_string(),
        schema_version: "1.1".to_string(),
        type_definitions: types,
    })
}

pub struct TypeBuilder {
    type_name: String,
    relations: HashMap<String, Rewrite>,
    metadata: HashMap<String, RelationMetadata>,
}

impl TypeBuilder {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            relations: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn relation(
        mut self,
        name: &str,
        rewrite: Rewrite,
        refs: Vec<RelationReference>,
    ) -> Self {
        self.relations.insert(name.to_string(), rewrite);
        self.metadata.insert(
            name.to_string(),
            RelationMetadata {
                directly_related_user_types: refs,
            },
        );
        self
    }

    pub fn build(self) -> TypeDefinition {
        TypeDefinition {
            type_name: self.type_name,
            relations: self.relations,
            metadata: Some(TypeMetadata {
                relations: self.metadata,
            }),
        }
    }
}

/// Wraps the in-memory store, delaying userset scans on selected relations
/// and recording whether such a scan was dropped before exhaustion.
pub struct SlowTupleReader {
    inner: Arc<MemoryTupleStore>,
    delays: HashMap<String, Duration>,
    dropped_early: HashMap<String, Arc<AtomicBool>>,
}

impl SlowTupleReader {
    pub fn new(inner: Arc<MemoryTupleStore>, delays: &[(&str, Duration)]) -> Self {
        Self {
            inner,
            delays: delays.iter().map(|(r, d)| (r.to_string(), *d)).collect(),
            dropped_early: delays
                .iter()
                .map(|(r, _)| (r.to_string(), Arc::new(AtomicBool::new(false))))
                .collect(),
        }
    }

    /// True once a delayed scan on `relation` was abandoned mid-stream.
    pub fn scan_dropped_early(&self, relation: &str) -> bool {
        self.dropped_early
            .get(relation)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

struct ObservedStream {
    inner: TupleStream,
    finished: bool,
    dropped_early: Arc<AtomicBool>,
}

impl Stream for ObservedStream {
    type Item = rebac_storage::Result<StoredTuple>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for ObservedStream {
    fn drop(&mut self) {
        if !self.finished {
            self.dropped_early.store(true, Ordering::SeqCst);
        }
    }
}

fn delayed(delay: Duration, inner: TupleStream, dropped_early: Arc<AtomicBool>) -> TupleStream {
    use futures::StreamExt;

    let gate = futures::stream::once(tokio::time::sleep(delay))
        .filter_map(|_| async { None::<rebac_storage::Result<StoredTuple>> });
    Box::pin(ObservedStream {
        inner: Box::pin(gate.chain(inner)),
        finished: false,
        dropped_early,
    })
}

#[async_trait]
impl TupleReader for SlowTupleReader {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> rebac_storage::Result<Option<StoredTuple>> {
        self.inner.read_user_tuple(store_id, key).await
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: ReadUsersetTuplesFilter,
    ) -> rebac_storage::Result<TupleStream> {
        let relation = filter.relation.clone();
        let stream = self.inner.read_userset_tuples(store_id, filter).await?;
        match (self.delays.get(&relation), self.dropped_early.get(&relation)) {
            (Some(delay), Some(flag)) => Ok(delayed(*delay, stream, flag.clone())),
            _ => Ok(stream),
        }
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: ReadStartingWithUserFilter,
    ) -> rebac_storage::Result<TupleStream> {
        self.inner.read_starting_with_user(store_id, filter).await
    }
}
