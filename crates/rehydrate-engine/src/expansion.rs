use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;

use rehydrate_core::config::RehydrateConfig;
use rehydrate_core::error::Result;
use rehydrate_core::types::{ChunkId, RankedResult, SourceKind};

use crate::adapters::{LexicalAdapter, SearchBudget, SearchOutcome, VectorAdapter};
use crate::entities::related_k;
use crate::fusion::{lexical_only, reciprocal_rank_fusion};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionOutcome {
    pub k_related: usize,
    /// Entities actually looked up (bounded by `max_entity_lookups`).
    pub looked_up: usize,
    /// Candidates that passed the similarity threshold, best fused score per id.
    pub candidates: Vec<RankedResult>,
    pub calls: usize,
    pub degraded_lookups: usize,
}

/// Similarity used for the threshold: the better of the cosine score and
/// the lexical score relative to the best lexical hit of the same lookup.
fn similarity(r: &RankedResult, max_lexical: f32) -> f32 {
    let lexical = match r.lexical_score { Some(l) if max_lexical > 0.0 => l / max_lexical, _ => 0.0 };
    r.vector_score.unwrap_or(0.0).max(lexical)
}

fn keep_similar(lex: &SearchOutcome, vec: &SearchOutcome, cfg: &RehydrateConfig) -> Vec<RankedResult> {
    let fused = if cfg.use_rrf { reciprocal_rank_fusion(&vec.results, &lex.results, cfg.rrf_k0) } else { lexical_only(&lex.results) };
    let max_lexical = lex.results.iter().filter_map(|r| r.lexical_score).fold(0.0f32, f32::max);
    fused.into_iter().filter(|r| similarity(r, max_lexical) >= cfg.stability_threshold).collect()
}

/// Secondary lookups for the extracted entities, `entity_workers` at a time.
/// Results are folded in entity order so the outcome does not depend on
/// completion order.
pub async fn expand_entities(lexical: &LexicalAdapter<'_>, vector: &VectorAdapter<'_>, entities: &[String], cfg: &RehydrateConfig, budget: SearchBudget) -> Result<ExpansionOutcome> {
    let k_related = related_k(entities.len(), cfg.entity_base_k, cfg.entity_multiplier, cfg.entity_cap);
    let lookups: Vec<(usize, &String)> = entities.iter().take(cfg.max_entity_lookups).enumerate().collect();
    let mut out = ExpansionOutcome { k_related, looked_up: lookups.len(), ..Default::default() };
    if lookups.is_empty() || k_related == 0 { return Ok(out); }

    let mut finished: Vec<(usize, Result<SearchOutcome>, Result<SearchOutcome>)> = stream::iter(lookups)
        .map(|(i, entity)| async move {
            let (lex, vec) = tokio::join!(lexical.search(entity, k_related, budget), async {
                if cfg.use_rrf { vector.search(entity, k_related, budget).await } else { Ok(SearchOutcome::skipped(SourceKind::Vector, "use_rrf=false")) }
            });
            (i, lex, vec)
        })
        .buffer_unordered(cfg.entity_workers)
        .collect()
        .await;
    finished.sort_by_key(|(i, _, _)| *i);

    let mut best: BTreeMap<ChunkId, RankedResult> = BTreeMap::new();
    for (i, lex, vec) in finished {
        let (lex, vec) = (lex?, vec?);
        out.calls += lex.calls + vec.calls;
        if lex.is_degraded() || vec.is_degraded() { out.degraded_lookups += 1; }
        let kept = keep_similar(&lex, &vec, cfg);
        tracing::debug!(entity = %entities[i], lexical = lex.results.len(), vector = vec.results.len(), kept = kept.len(), "entity lookup");
        for r in kept {
            match best.get(&r.chunk_ref) {
                Some(prev) if prev.fused_score >= r.fused_score => {}
                _ => { best.insert(r.chunk_ref.clone(), r); }
            }
        }
    }
    out.candidates = best.into_values().collect();
    Ok(out)
}
