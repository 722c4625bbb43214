//! Lexical and vector search adapters.
//!
//! Both wrap one store call in a sub-timeout and turn the raw hits into a
//! ranked list (score desc, ties by ascending chunk id, 1-based ranks).
//! A timeout or a non-fatal failure degrades the list to empty; only
//! `StoreUnavailable` is returned as an error.
use std::cmp::Ordering;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use rehydrate_core::bundle::StageStatus;
use rehydrate_core::error::{Error, Result};
use rehydrate_core::traits::{ChunkStore, EmbeddingProvider};
use rehydrate_core::types::{RankedResult, SearchHit, SourceKind};

/// Time allowance for one sub-search: its own timeout, never past the
/// request deadline.
#[derive(Debug, Clone, Copy)]
pub struct SearchBudget {
    pub deadline: Instant,
    pub sub_timeout: Duration,
}

impl SearchBudget {
    pub fn new(deadline: Instant, sub_timeout: Duration) -> Self { Self { deadline, sub_timeout } }

    pub fn cutoff(&self) -> Instant { (Instant::now() + self.sub_timeout).min(self.deadline) }

    pub fn expired(&self) -> bool { Instant::now() >= self.deadline }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub source: SourceKind,
    pub results: Vec<RankedResult>,
    pub status: StageStatus,
    pub elapsed: Duration,
    /// Store calls actually issued.
    pub calls: usize,
    pub detail: Option<String>,
}

impl SearchOutcome {
    pub fn skipped(source: SourceKind, why: &str) -> Self {
        Self { source, results: Vec::new(), status: StageStatus::Skipped, elapsed: Duration::ZERO, calls: 0, detail: Some(why.to_string()) }
    }

    /// Status is anything but a clean completion or a deliberate skip.
    pub fn is_degraded(&self) -> bool { matches!(self.status, StageStatus::TimedOut | StageStatus::Failed) }
}

/// Order hits by score desc then id asc, drop repeated ids, keep `k`.
pub fn rank_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<RankedResult> {
    hits.retain(|h| h.score.is_finite());
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.id.cmp(&b.id)));
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| seen.insert(h.id.clone()))
        .take(k)
        .enumerate()
        .map(|(i, h)| {
            let (vector_score, lexical_score) = match h.source {
                SourceKind::Vector => (Some(h.score), None),
                SourceKind::Lexical => (None, Some(h.score)),
            };
            RankedResult { chunk_ref: h.id, vector_score, lexical_score, fused_score: h.score as f64, rank: i + 1 }
        })
        .collect()
}

async fn bounded<F>(source: SourceKind, k: usize, budget: SearchBudget, calls: usize, fut: F) -> Result<SearchOutcome>
where
    F: Future<Output = Result<Vec<SearchHit>>>,
{
    let started = Instant::now();
    let res = tokio::time::timeout_at(budget.cutoff(), fut).await;
    let elapsed = started.elapsed();
    let mut out = SearchOutcome { source, results: Vec::new(), status: StageStatus::Completed, elapsed, calls, detail: None };
    match res {
        Ok(Ok(hits)) => {
            let hits = hits.into_iter().map(|mut h| { h.source = source; h }).collect();
            out.results = rank_hits(hits, k);
        }
        Ok(Err(e @ Error::StoreUnavailable(_))) => return Err(e),
        Ok(Err(e)) => {
            tracing::warn!(source = ?source, error = %e, "sub-search failed; list degraded to empty");
            out.status = StageStatus::Failed;
            out.detail = Some(e.to_string());
        }
        Err(_) => {
            tracing::warn!(source = ?source, elapsed_ms = elapsed.as_millis() as u64, "sub-search timed out; list degraded to empty");
            out.status = StageStatus::TimedOut;
            out.detail = Some(Error::SearchTimeout(elapsed).to_string());
        }
    }
    Ok(out)
}

pub struct LexicalAdapter<'a> {
    store: &'a dyn ChunkStore,
}

impl<'a> LexicalAdapter<'a> {
    pub fn new(store: &'a dyn ChunkStore) -> Self { Self { store } }

    pub async fn search(&self, query: &str, k: usize, budget: SearchBudget) -> Result<SearchOutcome> {
        bounded(SourceKind::Lexical, k, budget, 1, self.store.query_lexical(query, k)).await
    }
}

/// Embeds the query text with the external provider, then asks the store.
/// No embedding means no vector call and an empty, skipped list.
pub struct VectorAdapter<'a> {
    store: &'a dyn ChunkStore,
    embedder: &'a dyn EmbeddingProvider,
}

impl<'a> VectorAdapter<'a> {
    pub fn new(store: &'a dyn ChunkStore, embedder: &'a dyn EmbeddingProvider) -> Self { Self { store, embedder } }

    pub async fn search(&self, query: &str, k: usize, budget: SearchBudget) -> Result<SearchOutcome> {
        let started = Instant::now();
        let embedded = tokio::time::timeout_at(budget.cutoff(), self.embedder.embed(query)).await;
        let embedding = match embedded {
            Ok(Ok(Some(v))) => v,
            Ok(Ok(None)) => return Ok(SearchOutcome::skipped(SourceKind::Vector, "no query embedding")),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, embedder = self.embedder.embedder_id(), "query embedding failed; vector list empty");
                let mut out = SearchOutcome::skipped(SourceKind::Vector, &e.to_string());
                out.status = StageStatus::Failed;
                out.elapsed = started.elapsed();
                return Ok(out);
            }
            Err(_) => {
                let mut out = SearchOutcome::skipped(SourceKind::Vector, &Error::SearchTimeout(started.elapsed()).to_string());
                out.status = StageStatus::TimedOut;
                out.elapsed = started.elapsed();
                return Ok(out);
            }
        };
        let mut out = bounded(SourceKind::Vector, k, budget, 1, self.store.query_vector(&embedding, k)).await?;
        out.elapsed = started.elapsed();
        Ok(out)
    }
}
