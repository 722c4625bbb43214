use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::Instrument;

use rehydrate_core::bundle::{Bundle, RehydrateTrace, Stage, StageStatus, StageTrace};
use rehydrate_core::config::{RehydrateConfig, RehydrateOptions, RequestOverrides};
use rehydrate_core::error::{Error, Result};
use rehydrate_core::snapshot::ContextSnapshot;
use rehydrate_core::traits::{ChunkStore, EmbeddingProvider, TokenCounter};
use rehydrate_core::types::{Chunk, QueryContext, RankedResult, Role, ScoredChunk, SourceKind};
use rehydrate_embed::{HeuristicTokenCounter, NoEmbedder};

use crate::adapters::{LexicalAdapter, SearchBudget, SearchOutcome, VectorAdapter};
use crate::anchors::{AnchorResolution, AnchorResolver};
use crate::budget::BundleAssembler;
use crate::critique::{run_observers, BundleObserver, SelfCritique};
use crate::dedupe::deduplicate;
use crate::entities::EntityExtractor;
use crate::expansion::expand_entities;
use crate::fusion::{lexical_only, reciprocal_rank_fusion};

/// Stage bookkeeping for one request: trace entries, tracing events and
/// degradation reasons.
struct Recorder {
    trace: RehydrateTrace,
    reasons: Vec<String>,
}

impl Recorder {
    fn record(&mut self, stage: Stage, status: StageStatus, started: Instant, count: usize, detail: Option<String>) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match status {
            StageStatus::Completed | StageStatus::Skipped => tracing::info!(stage = %stage, status = %status, elapsed_ms, count, detail = detail.as_deref(), "stage finished"),
            StageStatus::TimedOut | StageStatus::Failed => {
                tracing::warn!(stage = %stage, status = %status, elapsed_ms, count, detail = detail.as_deref(), "stage degraded");
                self.reasons.push(match &detail { Some(d) => format!("{} {}: {}", stage, status, d), None => format!("{} {}", stage, status) });
            }
        }
        self.trace.stages.push(StageTrace { stage, status, elapsed_ms, count, detail });
    }

    fn search(&mut self, o: &SearchOutcome) {
        let stage = match o.source { SourceKind::Lexical => Stage::Lexical, SourceKind::Vector => Stage::Vector };
        self.trace.search_calls += o.calls;
        let started = Instant::now().checked_sub(o.elapsed).unwrap_or_else(Instant::now);
        self.record(stage, o.status, started, o.results.len(), o.detail.clone());
    }

    /// Record `stage` as skipped when the deadline already passed.
    fn past_deadline(&mut self, stage: Stage, deadline: Instant) -> bool {
        if Instant::now() < deadline { return false; }
        self.record(stage, StageStatus::Skipped, Instant::now(), 0, Some("request deadline exceeded".into()));
        if !self.reasons.iter().any(|r| r.contains("deadline")) { self.reasons.push("request deadline exceeded".into()); }
        true
    }

    fn timed_out(&mut self, stage: Stage, started: Instant) {
        self.record(stage, StageStatus::TimedOut, started, 0, Some("request deadline exceeded".into()));
    }
}

/// `Ok(None)` when the stage failed without taking the request down.
fn fatal_or_degrade<T>(rec: &mut Recorder, stage: Stage, started: Instant, res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => { rec.record(stage, StageStatus::Failed, started, 0, Some(e.to_string())); Ok(None) }
    }
}

/// The rehydration engine.
///
/// Holds only immutable, shareable state; every call builds its own
/// [`QueryContext`] so concurrent requests with different options never
/// interact. Swapping the snapshot means building a new engine value.
#[derive(Clone)]
pub struct Rehydrator {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    counter: Arc<dyn TokenCounter>,
    snapshot: Arc<ContextSnapshot>,
    anchors: Arc<AnchorResolver>,
    extractor: Arc<EntityExtractor>,
    defaults: RehydrateOptions,
    observers: Vec<Arc<dyn BundleObserver>>,
}

pub struct RehydratorBuilder {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    counter: Arc<dyn TokenCounter>,
    snapshot: ContextSnapshot,
    extractor: Option<EntityExtractor>,
    defaults: RehydrateOptions,
    observers: Vec<Arc<dyn BundleObserver>>,
}

impl RehydratorBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self { self.embedder = embedder; self }
    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self { self.counter = counter; self }
    pub fn snapshot(mut self, snapshot: ContextSnapshot) -> Self { self.snapshot = snapshot; self }
    pub fn extractor(mut self, extractor: EntityExtractor) -> Self { self.extractor = Some(extractor); self }
    pub fn options(mut self, defaults: RehydrateOptions) -> Self { self.defaults = defaults; self }
    pub fn observer(mut self, observer: Arc<dyn BundleObserver>) -> Self { self.observers.push(observer); self }

    /// Validates the default options once so a bad process configuration
    /// fails here rather than on the first request.
    pub fn build(self) -> Result<Rehydrator> {
        self.defaults.validate()?;
        let extractor = match self.extractor { Some(e) => e, None => EntityExtractor::with_default_matchers()? };
        Ok(Rehydrator {
            store: self.store,
            embedder: self.embedder,
            counter: self.counter,
            anchors: Arc::new(AnchorResolver::new(&self.snapshot.anchors)),
            snapshot: Arc::new(self.snapshot),
            extractor: Arc::new(extractor),
            defaults: self.defaults,
            observers: self.observers,
        })
    }
}

impl Rehydrator {
    pub fn builder(store: Arc<dyn ChunkStore>) -> RehydratorBuilder {
        RehydratorBuilder {
            store,
            embedder: Arc::new(NoEmbedder),
            counter: Arc::new(HeuristicTokenCounter),
            snapshot: ContextSnapshot::default(),
            extractor: None,
            defaults: RehydrateOptions::default(),
            observers: vec![Arc::new(SelfCritique)],
        }
    }

    pub fn snapshot(&self) -> &ContextSnapshot { &self.snapshot }

    pub fn defaults(&self) -> &RehydrateOptions { &self.defaults }

    /// Same engine, different snapshot version.
    pub fn with_snapshot(&self, snapshot: ContextSnapshot) -> Self {
        let mut next = self.clone();
        next.anchors = Arc::new(AnchorResolver::new(&snapshot.anchors));
        next.snapshot = Arc::new(snapshot);
        next
    }

    /// Validate `role` and the overrides, then assemble a bundle.
    pub async fn rehydrate(&self, role: &str, query: &str, overrides: &RequestOverrides) -> Result<Bundle> {
        let role: Role = role.parse()?;
        let config = self.defaults.with_overrides(overrides).validate()?;
        self.rehydrate_with(QueryContext { raw_query: query.to_string(), role, config }).await
    }

    pub async fn rehydrate_with(&self, ctx: QueryContext) -> Result<Bundle> {
        let span = tracing::info_span!("rehydrate", role = %ctx.role, snapshot_version = self.snapshot.version);
        self.run(&ctx).instrument(span).await
    }

    async fn run(&self, ctx: &QueryContext) -> Result<Bundle> {
        let cfg = &ctx.config;
        let request_started = Instant::now();
        let deadline = request_started + cfg.request_timeout;
        let budget = SearchBudget::new(deadline, cfg.sub_search_timeout);
        let mut rec = Recorder {
            trace: RehydrateTrace { snapshot_version: self.snapshot.version, role: ctx.role.to_string(), ..Default::default() },
            reasons: Vec::new(),
        };
        let store: &dyn ChunkStore = self.store.as_ref();

        // connection check: the one stage whose failure fails the request
        let started = Instant::now();
        match timeout_at(budget.cutoff(), store.ping()).await {
            Ok(Ok(())) => rec.record(Stage::Connect, StageStatus::Completed, started, 0, None),
            Ok(Err(e @ Error::StoreUnavailable(_))) => return Err(e),
            Ok(Err(e)) => return Err(Error::StoreUnavailable(e.to_string())),
            Err(_) => return Err(Error::StoreUnavailable(format!("connection check timed out after {}ms", started.elapsed().as_millis()))),
        }

        let started = Instant::now();
        let resolution = self.anchors.resolve(&ctx.raw_query, &ctx.role, cfg);
        rec.trace.expanded_query = resolution.expanded_query.clone();
        rec.trace.matched_anchors = resolution.matches.clone();
        rec.record(Stage::AnchorResolve, StageStatus::Completed, started, resolution.matches.len(), None);

        let lexical = LexicalAdapter::new(store);
        let vector = VectorAdapter::new(store, self.embedder.as_ref());
        let query = resolution.search_query(&ctx.raw_query);
        let (lex, vec) = tokio::join!(lexical.search(query, cfg.search_k, budget), async {
            if cfg.use_rrf { vector.search(query, cfg.search_k, budget).await } else { Ok(SearchOutcome::skipped(SourceKind::Vector, "use_rrf=false")) }
        });
        let (lex, vec) = (lex?, vec?);
        rec.search(&lex);
        rec.search(&vec);

        let started = Instant::now();
        let fused = if cfg.use_rrf { reciprocal_rank_fusion(&vec.results, &lex.results, cfg.rrf_k0) } else { lexical_only(&lex.results) };
        rec.record(Stage::Fusion, StageStatus::Completed, started, fused.len(), Some(if cfg.use_rrf { format!("rrf k0={}", cfg.rrf_k0) } else { "lexical only".into() }));

        let mut candidates = self.hydrate(&mut rec, &resolution, cfg, fused, deadline).await?;

        if !cfg.use_entity_expansion {
            rec.record(Stage::EntityExpansion, StageStatus::Skipped, Instant::now(), 0, Some("use_entity_expansion=false".into()));
        } else if !rec.past_deadline(Stage::EntityExpansion, deadline) {
            let started = Instant::now();
            let texts = std::iter::once(ctx.raw_query.as_str()).chain(candidates.iter().take(cfg.entity_top_n).map(|c| c.chunk.content.as_str()));
            let entities = self.extractor.extract_all(texts);
            rec.trace.entities = entities.clone();
            match timeout_at(deadline, expand_entities(&lexical, &vector, &entities, cfg, budget)).await {
                Err(_) => rec.timed_out(Stage::EntityExpansion, started),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(exp)) => {
                    rec.trace.k_related = Some(exp.k_related);
                    rec.trace.search_calls += exp.calls;
                    let known: std::collections::HashSet<&str> = candidates.iter().map(|c| c.id()).collect();
                    let fresh: Vec<RankedResult> = exp.candidates.iter().filter(|r| !known.contains(r.chunk_ref.as_str())).cloned().collect();
                    if cfg.use_rrf {
                        let improved: HashMap<&str, f64> = exp.candidates.iter().map(|r| (r.chunk_ref.as_str(), r.fused_score)).collect();
                        for c in candidates.iter_mut() {
                            if let Some(&s) = improved.get(c.id()) {
                                if s > c.ranked.fused_score - c.anchor_boost { c.ranked.fused_score = s + c.anchor_boost; }
                            }
                        }
                    }
                    let mut added = self.hydrate_expansion(&resolution, cfg, fresh, deadline).await?;
                    if !cfg.use_rrf { trail_primary(&candidates, &mut added); }
                    let n_added = added.len();
                    candidates.extend(added);
                    rerank(&mut candidates);
                    let status = if exp.degraded_lookups > 0 { StageStatus::Failed } else { StageStatus::Completed };
                    let detail = format!("entities={} looked_up={} k_related={} added={}{}", entities.len(), exp.looked_up, exp.k_related, n_added,
                        if exp.degraded_lookups > 0 { format!(" degraded_lookups={}", exp.degraded_lookups) } else { String::new() });
                    rec.record(Stage::EntityExpansion, status, started, n_added, Some(detail));
                }
            }
        }

        let started = Instant::now();
        let before = candidates.len();
        let deduped = deduplicate(candidates, cfg.dedupe_policy, cfg.max_chunks_per_file, cfg.overlap_threshold);
        rec.trace.dedupe_drops = deduped.drops;
        rec.record(Stage::Dedupe, StageStatus::Completed, started, deduped.kept.len(), Some(format!("policy={} dropped={}", cfg.dedupe_policy, before - deduped.kept.len())));
        let mut evidence = deduped.kept;
        rerank(&mut evidence);

        let recent = self.recency(&mut rec, cfg, deadline).await?;

        let started = Instant::now();
        let assembly = BundleAssembler::new(self.counter.as_ref(), cfg).assemble(&self.snapshot.pinned, &evidence, &recent);
        rec.trace.packing = assembly.decisions;
        rec.record(Stage::Packing, StageStatus::Completed, started, assembly.anchor_influenced.len() + assembly.semantic.len() + assembly.recency.len(), Some(format!("tokens={}/{} counter={}", assembly.total_tokens, cfg.token_budget, self.counter.name())));

        let degraded = !rec.reasons.is_empty();
        let bundle = Bundle {
            pinned_section: assembly.pinned,
            anchor_influenced_evidence: assembly.anchor_influenced,
            semantic_evidence: assembly.semantic,
            recency_section: assembly.recency,
            total_tokens: assembly.total_tokens,
            token_budget: cfg.token_budget,
            degraded,
            degraded_reason: degraded.then(|| rec.reasons.join("; ")),
            trace: rec.trace,
        };
        if degraded { tracing::warn!(reason = bundle.degraded_reason.as_deref(), "returning degraded bundle"); }

        let failed = run_observers(&self.observers, &bundle, ctx);
        tracing::info!(
            total_tokens = bundle.total_tokens,
            evidence = bundle.evidence_count(),
            recency = bundle.recency_section.len(),
            degraded,
            failed_observers = failed,
            elapsed_ms = request_started.elapsed().as_millis() as u64,
            "rehydrated"
        );
        Ok(bundle)
    }

    fn scored(&self, resolution: &AnchorResolution, cfg: &RehydrateConfig, ranked: Vec<RankedResult>, chunks: Vec<Chunk>) -> Vec<ScoredChunk> {
        let mut by_id: HashMap<String, Chunk> = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        ranked
            .into_iter()
            .filter_map(|mut r| {
                let chunk = by_id.remove(&r.chunk_ref)?;
                // boosts only make sense on the RRF scale
                let anchor_boost = if cfg.use_rrf { self.anchors.boost_for(resolution, &chunk, cfg) } else { 0.0 };
                r.fused_score += anchor_boost;
                Some(ScoredChunk { chunk, ranked: r, anchor_boost })
            })
            .collect()
    }

    async fn hydrate(&self, rec: &mut Recorder, resolution: &AnchorResolution, cfg: &RehydrateConfig, fused: Vec<RankedResult>, deadline: Instant) -> Result<Vec<ScoredChunk>> {
        if fused.is_empty() || rec.past_deadline(Stage::Hydrate, deadline) { return Ok(Vec::new()); }
        let started = Instant::now();
        let ids: Vec<String> = fused.iter().map(|r| r.chunk_ref.clone()).collect();
        let chunks = match timeout_at(deadline, self.store.get_chunks(&ids)).await {
            Err(_) => { rec.timed_out(Stage::Hydrate, started); return Ok(Vec::new()); }
            Ok(res) => match fatal_or_degrade(rec, Stage::Hydrate, started, res)? { Some(c) => c, None => return Ok(Vec::new()) },
        };
        let mut out = self.scored(resolution, cfg, fused, chunks);
        rerank(&mut out);
        let boosted = out.iter().filter(|c| c.anchor_boost > 0.0).count();
        rec.record(Stage::Hydrate, StageStatus::Completed, started, out.len(), (boosted > 0).then(|| format!("anchor_boosted={}", boosted)));
        Ok(out)
    }

    async fn hydrate_expansion(&self, resolution: &AnchorResolution, cfg: &RehydrateConfig, fresh: Vec<RankedResult>, deadline: Instant) -> Result<Vec<ScoredChunk>> {
        if fresh.is_empty() { return Ok(Vec::new()); }
        let ids: Vec<String> = fresh.iter().map(|r| r.chunk_ref.clone()).collect();
        match timeout_at(deadline, self.store.get_chunks(&ids)).await {
            Ok(Ok(chunks)) => Ok(self.scored(resolution, cfg, fresh, chunks)),
            Ok(Err(e)) if e.is_fatal() => Err(e),
            Ok(Err(e)) => { tracing::warn!(error = %e, "could not load entity candidates"); Ok(Vec::new()) }
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn recency(&self, rec: &mut Recorder, cfg: &RehydrateConfig, deadline: Instant) -> Result<Vec<Chunk>> {
        if cfg.recency_limit == 0 || cfg.recency_share <= 0.0 {
            rec.record(Stage::Recency, StageStatus::Skipped, Instant::now(), 0, Some("recency slot disabled".into()));
            return Ok(Vec::new());
        }
        if rec.past_deadline(Stage::Recency, deadline) { return Ok(Vec::new()); }
        let started = Instant::now();
        let recent = match timeout_at(deadline, self.store.recent_chunks(cfg.recency_limit)).await {
            Err(_) => { rec.timed_out(Stage::Recency, started); return Ok(Vec::new()); }
            Ok(res) => match fatal_or_degrade(rec, Stage::Recency, started, res)? { Some(c) => c, None => return Ok(Vec::new()) },
        };
        rec.record(Stage::Recency, StageStatus::Completed, started, recent.len(), None);
        Ok(recent)
    }
}

/// Lexical-only mode keeps the primary list in query order: entity hits are
/// rescaled below the weakest primary score, keeping their own order.
fn trail_primary(primary: &[ScoredChunk], added: &mut [ScoredChunk]) {
    let floor = primary.iter().map(|c| c.score()).fold(f64::INFINITY, f64::min);
    let top = added.iter().map(|c| c.ranked.fused_score).fold(0.0, f64::max);
    if !floor.is_finite() || floor <= 0.0 || top <= 0.0 { return; }
    for c in added.iter_mut() {
        c.ranked.fused_score = floor * 0.5 * (c.ranked.fused_score / top);
    }
}

/// Re-sort by (boosted) fused score, ties by id, and renumber ranks.
fn rerank(candidates: &mut [ScoredChunk]) {
    candidates.sort_by(|a, b| b.score().total_cmp(&a.score()).then_with(|| a.id().cmp(b.id())));
    for (i, c) in candidates.iter_mut().enumerate() { c.ranked.rank = i + 1; }
}
