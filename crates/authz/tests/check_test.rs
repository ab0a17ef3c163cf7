//! End-to-end check resolution against the in-memory tuple store.

mod common;

use common::{key, model, SlowTupleReader, TypeBuilder};
use rebac_authz::{CheckError, CheckResolverConfig, ResolverChain};
use rebac_models::{
    AuthorizationModel, ConsistencyPreference, RelationReference, ResolveCheckRequest, Rewrite,
};
use rebac_storage::MemoryTupleStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

const STORE: &str = "store-1";

fn doc_model() -> Arc<AuthorizationModel> {
    model(
        "model-doc",
        vec![
            TypeBuilder::new("user").build(),
            TypeBuilder::new("team")
                .relation(
                    "member",
                    Rewrite::This {},
                    vec![RelationReference::direct("user")],
                )
                .build(),
            TypeBuilder::new("folder")
                .relation(
                    "viewer",
                    Rewrite::This {},
                    vec![RelationReference::direct("user")],
                )
                .build(),
            TypeBuilder::new("doc")
                .relation(
                    "owner",
                    Rewrite::This {},
                    vec![RelationReference::direct("user")],
                )
                .relation(
                    "parent",
                    Rewrite::This {},
                    vec![RelationReference::direct("folder")],
                )
                .relation(
                    "reader",
                    Rewrite::This {},
                    vec![
                        RelationReference::direct("user"),
                        RelationReference::wildcard("user"),
                        RelationReference::userset("team", "member"),
                    ],
                )
                .relation("viewer", Rewrite::computed("owner"), vec![])
                .relation(
                    "parent_viewer",
                    Rewrite::tuple_to_userset("parent", "viewer"),
                    vec![],
                )
                .relation(
                    "access",
                    Rewrite::union(vec![Rewrite::This {}, Rewrite::computed("owner")]),
                    vec![RelationReference::direct("user")],
                )
                .relation(
                    "banned",
                    Rewrite::This {},
                    vec![RelationReference::direct("user")],
                )
                .relation(
                    "visible",
                    Rewrite::difference(Rewrite::computed("reader"), Rewrite::computed("banned")),
                    vec![],
                )
                .build(),
        ],
    )
}

fn setup(model: Arc<AuthorizationModel>) -> (Arc<MemoryTupleStore>, ResolverChain) {
    common::init_tracing();
    let store = Arc::new(MemoryTupleStore::new());
    let chain = ResolverChain::new(store.clone(), model, CheckResolverConfig::default());
    (store, chain)
}

fn request(model_id: &str, object: &str, relation: &str, user: &str) -> ResolveCheckRequest {
    ResolveCheckRequest::new(STORE, model_id, key(object, relation, user))
}

fn doc_request(object: &str, relation: &str, user: &str) -> ResolveCheckRequest {
    request("model-doc", object, relation, user)
}

#[tokio::test]
async fn direct_tuple_grants_access() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:readme", "reader", "user:anne"));

    let granted = chain
        .check(doc_request("doc:readme", "reader", "user:anne"))
        .await
        .unwrap();
    assert!(granted.allowed);
    assert_eq!(granted.resolution_metadata.datastore_query_count, 1);

    let denied = chain
        .check(doc_request("doc:readme", "reader", "user:bob"))
        .await
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.resolution_metadata.datastore_query_count, 2);
}

#[tokio::test]
async fn typed_wildcard_grants_every_subject_of_its_type() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:readme", "reader", "user:*"));

    let granted = chain
        .check(doc_request("doc:readme", "reader", "user:anne"))
        .await
        .unwrap();
    assert!(granted.allowed);

    // A wildcard of another type grants nothing.
    let team_subject = chain
        .check(doc_request("doc:readme", "reader", "team:eng#member"))
        .await
        .unwrap();
    assert!(!team_subject.allowed);
}

#[tokio::test]
async fn computed_userset_follows_the_rewritten_relation() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "owner", "user:bob"));

    assert!(chain
        .check(doc_request("doc:1", "viewer", "user:bob"))
        .await
        .unwrap()
        .allowed);
    assert!(!chain
        .check(doc_request("doc:1", "viewer", "user:anne"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn tuple_to_userset_reaches_through_the_parent() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "parent", "folder:f"));
    store.write(STORE, key("folder:f", "viewer", "user:alice"));

    assert!(chain
        .check(doc_request("doc:1", "parent_viewer", "user:alice"))
        .await
        .unwrap()
        .allowed);
    assert!(!chain
        .check(doc_request("doc:1", "parent_viewer", "user:bob"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn userset_tuple_expands_to_its_members() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "reader", "team:eng#member"));
    store.write(STORE, key("team:eng", "member", "user:carol"));

    assert!(chain
        .check(doc_request("doc:1", "reader", "user:carol"))
        .await
        .unwrap()
        .allowed);
    assert!(!chain
        .check(doc_request("doc:1", "reader", "user:dave"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn userset_subject_matches_by_identity_only() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "reader", "team:eng#member"));

    assert!(chain
        .check(doc_request("doc:1", "reader", "team:eng#member"))
        .await
        .unwrap()
        .allowed);
    assert!(!chain
        .check(doc_request("doc:1", "reader", "team:ops#member"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn union_allows_through_either_branch() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "access", "user:anne"));
    store.write(STORE, key("doc:2", "owner", "user:bob"));

    assert!(chain
        .check(doc_request("doc:1", "access", "user:anne"))
        .await
        .unwrap()
        .allowed);
    assert!(chain
        .check(doc_request("doc:2", "access", "user:bob"))
        .await
        .unwrap()
        .allowed);
    assert!(!chain
        .check(doc_request("doc:1", "access", "user:carol"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn difference_subtracts_banned_subjects() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "reader", "user:anne"));
    store.write(STORE, key("doc:1", "reader", "user:mallory"));
    store.write(STORE, key("doc:1", "banned", "user:mallory"));

    assert!(chain
        .check(doc_request("doc:1", "visible", "user:anne"))
        .await
        .unwrap()
        .allowed);
    assert!(!chain
        .check(doc_request("doc:1", "visible", "user:mallory"))
        .await
        .unwrap()
        .allowed);
    assert!(!chain
        .check(doc_request("doc:1", "visible", "user:carol"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn contextual_tuples_overlay_storage_for_one_request() {
    let (_store, chain) = setup(doc_model());

    let with_overlay = doc_request("doc:1", "reader", "user:anne")
        .with_contextual_tuples(vec![key("doc:1", "reader", "user:anne")]);
    assert!(chain.check(with_overlay).await.unwrap().allowed);

    // The overlay was never persisted.
    assert!(!chain
        .check(doc_request("doc:1", "reader", "user:anne"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn contextual_userset_tuples_feed_expansion() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("team:eng", "member", "user:carol"));

    let req = doc_request("doc:1", "reader", "user:carol")
        .with_contextual_tuples(vec![key("doc:1", "reader", "team:eng#member")]);
    assert!(chain.check(req).await.unwrap().allowed);
}

fn cycle_model() -> Arc<AuthorizationModel> {
    model(
        "model-cycle",
        vec![
            TypeBuilder::new("user").build(),
            TypeBuilder::new("node")
                .relation(
                    "reach",
                    Rewrite::union(vec![Rewrite::This {}, Rewrite::computed("reach")]),
                    vec![RelationReference::direct("user")],
                )
                .build(),
        ],
    )
}

#[tokio::test]
async fn cyclic_relation_terminates_at_the_depth_bound() {
    let (_store, chain) = setup(cycle_model());

    let err = chain
        .check(request("model-cycle", "node:1", "reach", "user:anne"))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::ResolutionDepthExceeded));
}

#[tokio::test]
async fn cycle_does_not_poison_a_decidable_union() {
    let (store, chain) = setup(cycle_model());
    store.write(STORE, key("node:1", "reach", "user:anne"));

    assert!(chain
        .check(request("model-cycle", "node:1", "reach", "user:anne"))
        .await
        .unwrap()
        .allowed);
}

fn hierarchy_model() -> Arc<AuthorizationModel> {
    model(
        "model-folders",
        vec![
            TypeBuilder::new("user").build(),
            TypeBuilder::new("folder")
                .relation(
                    "parent",
                    Rewrite::This {},
                    vec![RelationReference::direct("folder")],
                )
                .relation(
                    "viewer",
                    Rewrite::union(vec![
                        Rewrite::This {},
                        Rewrite::tuple_to_userset("parent", "viewer"),
                    ]),
                    vec![RelationReference::direct("user")],
                )
                .build(),
        ],
    )
}

fn folder_chain(store: &MemoryTupleStore, depth: u32) {
    for i in 0..depth {
        store.write(
            STORE,
            key(
                &format!("folder:{}", i),
                "parent",
                &format!("folder:{}", i + 1),
            ),
        );
    }
    store.write(STORE, key(&format!("folder:{}", depth), "viewer", "user:anne"));
}

#[tokio::test]
async fn shallow_hierarchy_resolves_within_the_depth_limit() {
    let (store, chain) = setup(hierarchy_model());
    folder_chain(&store, 5);

    assert!(chain
        .check(request("model-folders", "folder:0", "viewer", "user:anne"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn deep_hierarchy_exceeds_the_depth_limit() {
    let (store, chain) = setup(hierarchy_model());
    folder_chain(&store, 40);

    let err = chain
        .check(request("model-folders", "folder:0", "viewer", "user:anne"))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::ResolutionDepthExceeded));
}

fn gate_model() -> Arc<AuthorizationModel> {
    model(
        "model-gates",
        vec![
            TypeBuilder::new("user").build(),
            TypeBuilder::new("doc")
                .relation(
                    "instant_gate",
                    Rewrite::This {},
                    vec![RelationReference::direct("user")],
                )
                .relation(
                    "fast_gate",
                    Rewrite::This {},
                    vec![RelationReference::direct("user")],
                )
                .relation(
                    "slow_gate",
                    Rewrite::This {},
                    vec![RelationReference::direct("user")],
                )
                .relation(
                    "gated",
                    Rewrite::intersection(vec![
                        Rewrite::computed("fast_gate"),
                        Rewrite::computed("slow_gate"),
                    ]),
                    vec![],
                )
                .relation(
                    "any_gate",
                    Rewrite::union(vec![
                        Rewrite::computed("instant_gate"),
                        Rewrite::computed("slow_gate"),
                    ]),
                    vec![],
                )
                .build(),
        ],
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn intersection_short_circuit_cancels_the_slow_branch() {
    let store = Arc::new(MemoryTupleStore::new());
    let slow = Arc::new(SlowTupleReader::new(
        store.clone(),
        &[
            ("fast_gate", Duration::from_millis(30)),
            ("slow_gate", Duration::from_millis(300)),
        ],
    ));
    let chain = ResolverChain::new(slow.clone(), gate_model(), CheckResolverConfig::default());

    let started = Instant::now();
    let resp = chain
        .check(request("model-gates", "doc:1", "gated", "user:anne"))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(!resp.allowed);
    assert!(elapsed < Duration::from_millis(250), "took {:?}", elapsed);

    // The slow branch's scan unwinds once the decision lands.
    let deadline = Instant::now() + Duration::from_secs(1);
    while !slow.scan_dropped_early("slow_gate") {
        assert!(Instant::now() < deadline, "slow scan never observed cancellation");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn union_returns_as_soon_as_one_branch_allows() {
    let store = Arc::new(MemoryTupleStore::new());
    store.write(STORE, key("doc:1", "instant_gate", "user:anne"));
    let slow = Arc::new(SlowTupleReader::new(
        store.clone(),
        &[("slow_gate", Duration::from_millis(500))],
    ));
    let chain = ResolverChain::new(slow, gate_model(), CheckResolverConfig::default());

    let started = Instant::now();
    let resp = chain
        .check(request("model-gates", "doc:1", "any_gate", "user:anne"))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(resp.allowed);
    assert!(elapsed < Duration::from_millis(200), "took {:?}", elapsed);
}

#[tokio::test]
async fn deadline_is_surfaced_as_an_error() {
    let store = Arc::new(MemoryTupleStore::new());
    let slow = Arc::new(SlowTupleReader::new(
        store.clone(),
        &[("slow_gate", Duration::from_millis(300))],
    ));
    let chain = ResolverChain::new(slow, gate_model(), CheckResolverConfig::default());

    let err = chain
        .check_with_timeout(
            request("model-gates", "doc:1", "slow_gate", "user:anne"),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::DeadlineExceeded));
}

#[tokio::test]
async fn cancelled_request_is_rejected() {
    let (_store, chain) = setup(doc_model());

    let req = doc_request("doc:1", "reader", "user:anne");
    req.cancellation.cancel();

    let err = chain.check(req).await.unwrap_err();
    assert!(matches!(err, CheckError::Cancelled));
}

#[tokio::test]
async fn unknown_relation_and_type_are_input_errors() {
    let (_store, chain) = setup(doc_model());

    let err = chain
        .check(doc_request("doc:1", "nonexistent", "user:anne"))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::InvalidInput(_)));

    let err = chain
        .check(doc_request("widget:1", "reader", "user:anne"))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::InvalidInput(_)));
}

#[tokio::test]
async fn request_for_another_model_is_rejected() {
    let (_store, chain) = setup(doc_model());

    let err = chain
        .check(request("model-other", "doc:1", "reader", "user:anne"))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::InvalidModel(_)));
}

#[tokio::test]
async fn repeated_checks_are_deterministic() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "reader", "team:eng#member"));
    store.write(STORE, key("team:eng", "member", "user:carol"));

    for _ in 0..3 {
        // Bypass the cache so every run exercises full resolution.
        let req = doc_request("doc:1", "reader", "user:carol")
            .with_consistency(ConsistencyPreference::HigherConsistency);
        assert!(chain.check(req).await.unwrap().allowed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_roots_agree_with_serial_execution() {
    let (store, chain) = setup(doc_model());
    store.write(STORE, key("doc:1", "reader", "user:anne"));
    store.write(STORE, key("doc:1", "reader", "team:eng#member"));
    store.write(STORE, key("team:eng", "member", "user:carol"));
    store.write(STORE, key("doc:2", "owner", "user:bob"));
    store.write(STORE, key("doc:3", "parent", "folder:f"));
    store.write(STORE, key("folder:f", "viewer", "user:erin"));

    let cases: Vec<(&str, &str, &str)> = vec![
        ("doc:1", "reader", "user:anne"),
        ("doc:1", "reader", "user:carol"),
        ("doc:1", "reader", "user:dave"),
        ("doc:2", "viewer", "user:bob"),
        ("doc:2", "viewer", "user:anne"),
        ("doc:3", "parent_viewer", "user:erin"),
        ("doc:3", "parent_viewer", "user:bob"),
    ];

    let mut serial = Vec::new();
    for &(object, relation, user) in &cases {
        serial.push(
            chain
                .check(doc_request(object, relation, user))
                .await
                .unwrap()
                .allowed,
        );
    }

    let chain = Arc::new(chain);
    let mut workers = Vec::new();
    for _ in 0..4 {
        let chain = chain.clone();
        let cases = cases.clone();
        workers.push(tokio::spawn(async move {
            let mut answers = Vec::new();
            for &(object, relation, user) in &cases {
                answers.push(
                    chain
                        .check(doc_request(object, relation, user))
                        .await
                        .unwrap()
                        .allowed,
                );
            }
            answers
        }));
    }

    for worker in workers {
        assert_eq!(worker.await.unwrap(), serial);
    }
}
