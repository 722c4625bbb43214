mod common;

use proptest::prelude::*;

use rehydrate_core::config::{DedupePolicy, RehydrateOptions};
use rehydrate_core::snapshot::PinnedInvariant;
use rehydrate_core::types::{RankedResult, ScoredChunk};
use rehydrate_embed::HeuristicTokenCounter;
use rehydrate_engine::{deduplicate, lexical_only, reciprocal_rank_fusion, BundleAssembler, PINNED_TOKEN_CAP};

use common::chunk;

fn ranked(ids: &[u8], vector: bool) -> Vec<RankedResult> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let score = 1.0 / (i as f32 + 1.0);
            RankedResult {
                chunk_ref: format!("c{:02}", id),
                vector_score: vector.then_some(score),
                lexical_score: (!vector).then_some(score),
                fused_score: score as f64,
                rank: i + 1,
            }
        })
        .collect()
}

fn distinct_ids() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::btree_set(0u8..24, 0..12).prop_flat_map(|s| Just(s.into_iter().collect::<Vec<_>>()).prop_shuffle())
}

fn words(n: usize) -> String { vec!["tok"; n].join(" ") }

proptest! {
    #[test]
    fn fused_scores_follow_positions(vector in distinct_ids(), lexical in distinct_ids(), k0 in 1u32..100) {
        let fused = reciprocal_rank_fusion(&ranked(&vector, true), &ranked(&lexical, false), k0);
        for r in &fused {
            let id: u8 = r.chunk_ref[1..].parse().unwrap();
            let term = |list: &[u8]| list.iter().position(|x| *x == id).map(|p| 1.0 / (k0 as f64 + p as f64 + 1.0)).unwrap_or(0.0);
            prop_assert!((r.fused_score - (term(&vector) + term(&lexical))).abs() < 1e-12);
            prop_assert_eq!(r.vector_score.is_some(), vector.contains(&id));
            prop_assert_eq!(r.lexical_score.is_some(), lexical.contains(&id));
        }
        let mut all: Vec<u8> = vector.iter().chain(lexical.iter()).copied().collect();
        all.sort();
        all.dedup();
        prop_assert_eq!(fused.len(), all.len());
    }

    #[test]
    fn fusion_order_is_total_and_repeatable(vector in distinct_ids(), lexical in distinct_ids()) {
        let a = reciprocal_rank_fusion(&ranked(&vector, true), &ranked(&lexical, false), 60);
        let b = reciprocal_rank_fusion(&ranked(&vector, true), &ranked(&lexical, false), 60);
        prop_assert_eq!(&a, &b);
        for (i, r) in a.iter().enumerate() { prop_assert_eq!(r.rank, i + 1); }
        for w in a.windows(2) {
            prop_assert!(w[0].fused_score > w[1].fused_score || (w[0].fused_score == w[1].fused_score && w[0].chunk_ref < w[1].chunk_ref));
        }
    }

    #[test]
    fn lexical_only_keeps_lexical_order(lexical in distinct_ids()) {
        let input = ranked(&lexical, false);
        let out = lexical_only(&input);
        let ids: Vec<&str> = out.iter().map(|r| r.chunk_ref.as_str()).collect();
        let expected: Vec<&str> = input.iter().map(|r| r.chunk_ref.as_str()).collect();
        prop_assert_eq!(ids, expected);
        prop_assert!(out.iter().all(|r| r.vector_score.is_none()));
    }

    #[test]
    fn assembly_never_exceeds_the_budget(
        budget in 1usize..600,
        pinned_words in prop::collection::vec(0usize..300, 0..4),
        evidence_words in prop::collection::vec(0usize..120, 0..12),
        recency_words in prop::collection::vec(0usize..60, 0..4),
    ) {
        let cfg = RehydrateOptions { token_budget: budget, ..Default::default() }.validate().unwrap();
        let pinned: Vec<PinnedInvariant> = pinned_words.iter().enumerate().map(|(i, n)| PinnedInvariant { id: format!("p{}", i), text: words(*n) }).collect();
        let evidence: Vec<ScoredChunk> = evidence_words
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let c = chunk(&format!("e{:02}", i), &format!("f{}.rs", i), 0, (1, 10), &words(*n));
                ScoredChunk { ranked: RankedResult { chunk_ref: c.id.clone(), vector_score: None, lexical_score: None, fused_score: 1.0 / (i as f64 + 1.0), rank: i + 1 }, chunk: c, anchor_boost: if i % 3 == 0 { 0.01 } else { 0.0 } }
            })
            .collect();
        let recency: Vec<_> = recency_words.iter().enumerate().map(|(i, n)| chunk(&format!("r{}", i), "CHANGELOG.md", i, (1, 2), &words(*n))).collect();

        let a = BundleAssembler::new(&HeuristicTokenCounter, &cfg).assemble(&pinned, &evidence, &recency);
        prop_assert!(a.total_tokens <= budget);
        prop_assert!(a.pinned.tokens <= PINNED_TOKEN_CAP.min(budget));
        let packed: usize = a.anchor_influenced.iter().chain(&a.semantic).chain(&a.recency).map(|e| e.tokens).sum();
        prop_assert_eq!(a.total_tokens, a.pinned.tokens + packed);
        let rest = budget - a.pinned.tokens;
        let evidence_tokens: usize = a.anchor_influenced.iter().chain(&a.semantic).map(|e| e.tokens).sum();
        prop_assert!(evidence_tokens as f64 <= rest as f64 * cfg.evidence_share as f64);
    }

    #[test]
    fn overlap_policy_keeps_no_more_than_file_policy(
        spans in prop::collection::vec((0usize..4, 1u32..80, 1u32..30, 0usize..5), 0..16),
        max_per_file in 1usize..4,
        threshold in 0.05f32..1.0,
    ) {
        let candidates: Vec<ScoredChunk> = spans
            .iter()
            .enumerate()
            .map(|(i, (file, start, len, text))| {
                let c = chunk(&format!("c{:02}", i), &format!("f{}.rs", file), i, (*start, start + len), &format!("body {}", text));
                ScoredChunk { ranked: RankedResult { chunk_ref: c.id.clone(), vector_score: None, lexical_score: None, fused_score: 1.0 / (i as f64 + 1.0), rank: i + 1 }, chunk: c, anchor_boost: 0.0 }
            })
            .collect();
        let file = deduplicate(candidates.clone(), DedupePolicy::File, max_per_file, threshold);
        let overlap = deduplicate(candidates.clone(), DedupePolicy::FileOverlap, max_per_file, threshold);
        prop_assert!(overlap.kept.len() <= file.kept.len());
        prop_assert_eq!(file.kept.len() + file.drops.len(), candidates.len());
        prop_assert_eq!(overlap.kept.len() + overlap.drops.len(), candidates.len());
    }
}
