//! Reciprocal Rank Fusion: score = Σ 1/(k0 + rank_i)
//!
//! Merges the vector and lexical lists without normalizing their scores.
//! A chunk missing from one list gets nothing from it.

use std::collections::{BTreeMap, HashSet};

use rehydrate_core::types::{ChunkId, RankedResult};

pub const DEFAULT_K0: u32 = 60;

#[derive(Default)]
struct Acc {
    vector_score: Option<f32>,
    lexical_score: Option<f32>,
    fused: f64,
}

/// Fuse two ranked lists. Each list must already be in rank order; its
/// position (1-based) is the rank used, and a repeated id only counts once.
pub fn reciprocal_rank_fusion(vector: &[RankedResult], lexical: &[RankedResult], k0: u32) -> Vec<RankedResult> {
    let mut acc: BTreeMap<ChunkId, Acc> = BTreeMap::new();
    for (list, is_vector) in [(vector, true), (lexical, false)] {
        let mut seen = HashSet::new();
        for (i, r) in list.iter().filter(|r| seen.insert(r.chunk_ref.as_str())).enumerate() {
            let e = acc.entry(r.chunk_ref.clone()).or_default();
            e.fused += 1.0 / (k0 as f64 + (i + 1) as f64);
            if is_vector { e.vector_score = r.vector_score; } else { e.lexical_score = r.lexical_score; }
        }
    }
    let mut out: Vec<RankedResult> = acc
        .into_iter()
        .map(|(id, a)| RankedResult { chunk_ref: id, vector_score: a.vector_score, lexical_score: a.lexical_score, fused_score: a.fused, rank: 0 })
        .collect();
    assign_ranks(&mut out);
    out
}

/// Fusion disabled: the lexical list as-is, fused score = lexical score.
pub fn lexical_only(lexical: &[RankedResult]) -> Vec<RankedResult> {
    let mut seen = HashSet::new();
    let mut out: Vec<RankedResult> = lexical
        .iter()
        .filter(|r| seen.insert(r.chunk_ref.as_str()))
        .map(|r| RankedResult { chunk_ref: r.chunk_ref.clone(), vector_score: None, lexical_score: r.lexical_score, fused_score: r.lexical_score.unwrap_or(0.0) as f64, rank: 0 })
        .collect();
    assign_ranks(&mut out);
    out
}

/// Sort by fused score desc, ties by ascending id, and renumber from 1.
pub fn assign_ranks(results: &mut [RankedResult]) {
    results.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score).then_with(|| a.chunk_ref.cmp(&b.chunk_ref)));
    for (i, r) in results.iter_mut().enumerate() { r.rank = i + 1; }
}
