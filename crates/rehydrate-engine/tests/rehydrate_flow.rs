mod common;

use std::panic;
use std::sync::Arc;
use std::time::Duration;

use rehydrate_core::bundle::{Bundle, Stage, StageStatus};
use rehydrate_core::config::{DedupePolicy, RehydrateOptions, RequestOverrides};
use rehydrate_core::error::{Error, Result};
use rehydrate_core::snapshot::ContextSnapshot;
use rehydrate_core::types::QueryContext;
use rehydrate_engine::{BundleObserver, Rehydrator, PINNED_TOKEN_CAP};

use common::{chunk, corpus, embedder, engine, scripted_store, snapshot};

const QUERY: &str = "How do I implement HybridVectorStore?";

fn overrides(pairs: &[(&str, &str)]) -> RequestOverrides {
    RequestOverrides::from_pairs(pairs.iter().copied()).expect("overrides")
}

fn assert_caps(b: &Bundle) {
    assert!(b.pinned_section.tokens <= PINNED_TOKEN_CAP);
    assert!(b.total_tokens <= b.token_budget, "total {} > budget {}", b.total_tokens, b.token_budget);
}

#[tokio::test]
async fn hybrid_vector_store_query_for_implementer() {
    let (engine, store) = engine().await;
    let b = engine.rehydrate("implementer", QUERY, &overrides(&[("stability", "0.6")])).await.expect("bundle");
    eprintln!("bundle: {:#?}", b);

    assert!(!b.degraded, "reason: {:?}", b.degraded_reason);
    assert_caps(&b);
    assert!(b.trace.entities.iter().any(|e| e == "HybridVectorStore"));
    let anchor = b.trace.matched_anchors.iter().find(|m| m.key == "HybridVectorStore").expect("anchor matched");
    assert!(anchor.role_pinned);
    assert!(b.trace.expanded_query.as_deref().is_some_and(|q| q.contains("hybrid")));

    // the anchor chunk competes on score and comes out as anchor-influenced evidence
    assert!(b.anchor_influenced_evidence.iter().any(|e| e.chunk_id == "hybrid-0"));
    assert_eq!(b.evidence()[0].file_path, "src/store/hybrid.rs");
    assert!(b.semantic_evidence.iter().all(|e| e.chunk_id != "hybrid-0"));

    assert_eq!(b.pinned_section.included, vec!["mission", "style"]);
    assert!(!b.pinned_section.truncated);
    // only dated chunks qualify, and never one already used as evidence
    assert!(!b.recency_section.is_empty());
    assert!(b.recency_section.iter().all(|r| r.file_path == "CHANGELOG.md"));
    let evidence_ids: Vec<&str> = b.evidence().iter().map(|e| e.chunk_id.as_str()).collect();
    assert!(b.recency_section.iter().all(|r| !evidence_ids.contains(&r.chunk_id.as_str())));
    assert_eq!(b.trace.snapshot_version, 3);
    assert_eq!(b.trace.search_calls, store.search_calls());
    assert_eq!(b.trace.stage_status(Stage::Lexical), Some(StageStatus::Completed));
    assert_eq!(b.trace.stage_status(Stage::Vector), Some(StageStatus::Completed));
}

#[tokio::test]
async fn same_request_same_bundle_order() {
    let (engine, _store) = engine().await;
    let a = engine.rehydrate("implementer", QUERY, &RequestOverrides::default()).await.expect("first");
    let b = engine.rehydrate("implementer", QUERY, &RequestOverrides::default()).await.expect("second");
    assert_eq!(a.chunk_ids(), b.chunk_ids());
    assert_eq!(a.total_tokens, b.total_tokens);
}

#[tokio::test]
async fn anchors_pinned_to_other_roles_do_not_boost() {
    let (engine, _store) = engine().await;
    let b = engine.rehydrate("planner", QUERY, &RequestOverrides::default()).await.expect("bundle");
    assert!(b.anchor_influenced_evidence.is_empty());
    assert!(b.trace.matched_anchors.iter().all(|m| !m.role_pinned));
    assert!(b.evidence_count() > 0);
}

#[tokio::test]
async fn stability_zero_ignores_anchors() {
    let (engine, _store) = engine().await;
    let b = engine.rehydrate("implementer", QUERY, &overrides(&[("stability", "0")])).await.expect("bundle");
    assert!(b.trace.expanded_query.is_none());
    assert!(b.anchor_influenced_evidence.is_empty());
}

#[tokio::test]
async fn entity_expansion_off_issues_no_extra_calls() {
    let (engine, store) = engine().await;
    let b = engine.rehydrate("implementer", QUERY, &overrides(&[("use_entity_expansion", "false")])).await.expect("bundle");
    assert_eq!(store.search_calls(), 2, "one lexical and one vector call");
    assert_eq!(b.trace.search_calls, 2);
    assert_eq!(b.trace.stage_status(Stage::EntityExpansion), Some(StageStatus::Skipped));
    assert!(b.trace.entities.is_empty());
    assert!(b.trace.k_related.is_none());

    store.reset_calls();
    let b = engine.rehydrate("implementer", QUERY, &RequestOverrides::default()).await.expect("bundle");
    assert!(store.search_calls() > 2);
    assert_eq!(b.trace.search_calls, store.search_calls());
    assert!(b.trace.k_related.is_some());
}

#[tokio::test]
async fn rrf_off_is_pure_lexical() {
    let (engine, store) = engine().await;
    let o = overrides(&[("use_rrf", "false"), ("use_entity_expansion", "off"), ("REHYDRATE_DEDUPE_POLICY", "file")]);
    let b = engine.rehydrate("implementer", QUERY, &o).await.expect("bundle");
    assert_eq!(store.vector_calls(), 0);
    assert_eq!(store.lexical_calls(), 1);
    assert_eq!(b.trace.stage_status(Stage::Vector), Some(StageStatus::Skipped));
    assert!(b.anchor_influenced_evidence.is_empty(), "no anchor boosts outside RRF");
    let scores: Vec<f64> = b.evidence().iter().map(|e| e.fused_score).collect();
    assert!(!scores.is_empty());
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn lexical_only_expansion_keeps_query_hits_first() {
    let chunks = vec![
        chunk("loader-0", "src/loader.rs", 0, (1, 12), "loader setup notes: the loader reads use_entity_expansion once"),
        chunk("flags-0", "src/flags.rs", 0, (1, 4), "toggles: use_entity_expansion use_entity_expansion use_entity_expansion controls lookups"),
        chunk("misc-0", "src/misc.rs", 0, (1, 3), "unrelated filler about gardening"),
        chunk("misc-1", "src/misc2.rs", 0, (1, 3), "more filler about water tanks"),
    ];
    let snap = snapshot(&chunks);
    let store = scripted_store(chunks).await;
    let engine = Rehydrator::builder(store.clone()).embedder(embedder()).snapshot(snap).build().expect("engine");

    let base = engine.rehydrate("implementer", "loader setup", &overrides(&[("use_rrf", "false"), ("use_entity_expansion", "false")])).await.expect("bundle");
    let primary: Vec<String> = base.evidence().iter().map(|e| e.chunk_id.clone()).collect();
    assert_eq!(primary.first().map(String::as_str), Some("loader-0"));

    let b = engine.rehydrate("implementer", "loader setup", &overrides(&[("use_rrf", "false")])).await.expect("bundle");
    assert!(b.trace.k_related.is_some());
    let ids: Vec<String> = b.evidence().iter().map(|e| e.chunk_id.clone()).collect();
    assert!(ids.contains(&"flags-0".to_string()), "entity hit added: {:?}", ids);
    assert_eq!(&ids[..primary.len()], primary.as_slice());
    let scores: Vec<f64> = b.evidence().iter().map(|e| e.fused_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_caps(&b);
}

#[tokio::test(start_paused = true)]
async fn slow_lexical_search_leaves_vector_only_evidence() {
    let (engine, store) = engine().await;
    store.delay_lexical(Duration::from_secs(30));
    let b = engine.rehydrate("implementer", QUERY, &overrides(&[("use_entity_expansion", "false")])).await.expect("bundle");

    assert_eq!(b.trace.stage_status(Stage::Lexical), Some(StageStatus::TimedOut));
    assert_eq!(b.trace.stage_status(Stage::Vector), Some(StageStatus::Completed));
    assert!(b.degraded);
    assert!(b.degraded_reason.as_deref().is_some_and(|r| r.contains("lexical timed_out")));
    let vector_ids = store.vector_ids();
    assert!(b.evidence_count() > 0);
    assert!(b.evidence().iter().all(|e| vector_ids.contains(&e.chunk_id)));
    assert_caps(&b);
}

#[tokio::test(start_paused = true)]
async fn request_deadline_returns_partial_bundle() {
    let (engine, store) = engine().await;
    store.delay_lexical(Duration::from_secs(30));
    let o = RehydrateOptions { request_timeout_ms: 1000, sub_search_timeout_ms: 1000, ..Default::default() };
    let ctx = QueryContext { raw_query: QUERY.into(), role: "implementer".parse().expect("role"), config: o.validate().expect("config") };
    let b = engine.rehydrate_with(ctx).await.expect("partial bundle");

    assert!(b.degraded);
    assert!(b.degraded_reason.as_deref().is_some_and(|r| r.contains("deadline")));
    assert_eq!(b.trace.stage_status(Stage::Hydrate), Some(StageStatus::Skipped));
    assert_eq!(b.evidence_count(), 0);
    assert!(b.pinned_section.tokens > 0);
    assert_caps(&b);
}

#[tokio::test]
async fn refused_connection_is_an_error() {
    let (engine, store) = engine().await;
    store.refuse_connections();
    let res = engine.rehydrate("implementer", QUERY, &RequestOverrides::default()).await;
    assert!(matches!(res, Err(Error::StoreUnavailable(_))), "got {:?}", res.map(|b| b.chunk_ids().len()));
    assert_eq!(store.search_calls(), 0);
}

#[tokio::test]
async fn invalid_requests_fail_fast() {
    let (engine, store) = engine().await;
    let res = engine.rehydrate("implementer", QUERY, &RequestOverrides { token_budget: Some(0), ..Default::default() }).await;
    assert!(matches!(res, Err(Error::InvalidConfig(_))));
    let res = engine.rehydrate("", QUERY, &RequestOverrides::default()).await;
    assert!(matches!(res, Err(Error::InvalidConfig(_))));
    assert_eq!(store.search_calls(), 0);
}

#[tokio::test]
async fn overlap_policy_never_keeps_more() {
    let (engine, _store) = engine().await;
    for budget in ["300", "1200", "4000"] {
        let file = engine.rehydrate("implementer", QUERY, &overrides(&[("dedupe_policy", "file"), ("token_budget", budget)])).await.expect("file");
        let overlap = engine.rehydrate("implementer", QUERY, &overrides(&[("dedupe_policy", "file+overlap"), ("token_budget", budget)])).await.expect("overlap");
        assert!(overlap.evidence_count() <= file.evidence_count());
        let files: std::collections::HashSet<&str> = file.evidence().iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(files.len(), file.evidence_count(), "one chunk per file");
    }
}

#[tokio::test]
async fn tiny_budgets_hold_every_cap() {
    let (engine, _store) = engine().await;
    for budget in [1usize, 5, 12, 40, 199, 200, 201] {
        let b = engine.rehydrate("implementer", QUERY, &RequestOverrides { token_budget: Some(budget), ..Default::default() }).await.expect("bundle");
        assert_caps(&b);
        assert_eq!(b.token_budget, budget);
    }
}

#[tokio::test]
async fn concurrent_requests_keep_their_own_options() {
    let (engine, _store) = engine().await;
    let small = RequestOverrides { token_budget: Some(60), ..Default::default() };
    let large = RequestOverrides { token_budget: Some(2000), dedupe_policy: Some(DedupePolicy::File), ..Default::default() };
    let (a, b) = tokio::join!(engine.rehydrate("implementer", QUERY, &small), engine.rehydrate("coder", QUERY, &large));
    let (a, b) = (a.expect("small"), b.expect("large"));
    assert_eq!(a.token_budget, 60);
    assert_eq!(b.token_budget, 2000);
    assert!(a.total_tokens <= 60);
    assert_eq!(b.trace.role, "coder");
}

#[tokio::test]
async fn snapshot_swap_builds_a_new_engine_value() {
    let (engine, _store) = engine().await;
    let next = engine.with_snapshot(ContextSnapshot::new(4, Vec::new(), Vec::new()));
    let b = next.rehydrate("implementer", QUERY, &RequestOverrides::default()).await.expect("bundle");
    assert_eq!(b.trace.snapshot_version, 4);
    assert!(b.pinned_section.text.is_empty());
    assert!(b.trace.matched_anchors.is_empty());
    assert_eq!(engine.snapshot().version, 3);
}

struct Exploding;

impl BundleObserver for Exploding {
    fn name(&self) -> &str { "exploding" }
    fn observe(&self, _bundle: &Bundle, _ctx: &QueryContext) -> Result<()> { panic!("observer blew up") }
}

struct Failing;

impl BundleObserver for Failing {
    fn name(&self) -> &str { "failing" }
    fn observe(&self, _bundle: &Bundle, _ctx: &QueryContext) -> Result<()> { Err(Error::Operation("nope".into())) }
}

#[tokio::test(start_paused = true)]
async fn observers_never_change_the_bundle() {
    let chunks = corpus();
    let snap = snapshot(&chunks);
    let store = scripted_store(chunks).await;
    let plain = Rehydrator::builder(store.clone()).embedder(embedder()).snapshot(snap.clone()).build().expect("plain");
    let noisy = Rehydrator::builder(store.clone())
        .embedder(embedder())
        .snapshot(snap)
        .observer(Arc::new(Exploding))
        .observer(Arc::new(Failing))
        .build()
        .expect("noisy");

    let hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let a = plain.rehydrate("implementer", QUERY, &RequestOverrides::default()).await.expect("plain bundle");
    let b = noisy.rehydrate("implementer", QUERY, &RequestOverrides::default()).await.expect("noisy bundle");
    panic::set_hook(hook);
    assert_eq!(a, b);
}
