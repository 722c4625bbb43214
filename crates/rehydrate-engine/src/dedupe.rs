//! File-level and overlap-aware duplicate removal.

use std::collections::HashMap;

use rehydrate_core::bundle::{DedupeDrop, DropReason};
use rehydrate_core::config::DedupePolicy;
use rehydrate_core::types::{Chunk, ChunkId, ScoredChunk};

#[derive(Debug, Clone, Default)]
pub struct DedupeOutcome {
    pub kept: Vec<ScoredChunk>,
    pub drops: Vec<DedupeDrop>,
}

/// Overlapping lines over the shorter of the two spans.
pub fn overlap_ratio(a: &Chunk, b: &Chunk) -> f32 {
    let lo = a.line_start.max(b.line_start);
    let hi = a.line_end.min(b.line_end);
    if hi < lo { return 0.0; }
    (hi - lo + 1) as f32 / a.line_span().min(b.line_span()) as f32
}

pub fn content_hash(content: &str) -> blake3::Hash { blake3::hash(content.trim().as_bytes()) }

/// Walk candidates best-first and keep what the policy allows.
///
/// `file` keeps at most `max_per_file` chunks per path. `file+overlap` also
/// drops a chunk whose lines overlap a kept chunk of the same file by more
/// than `overlap_threshold`, and any chunk whose content repeats a kept one.
/// The second policy never keeps more chunks than the first for the same input.
pub fn deduplicate(mut candidates: Vec<ScoredChunk>, policy: DedupePolicy, max_per_file: usize, overlap_threshold: f32) -> DedupeOutcome {
    candidates.sort_by(|a, b| b.score().total_cmp(&a.score()).then_with(|| a.id().cmp(b.id())));
    let mut by_file: HashMap<String, Vec<usize>> = HashMap::new();
    let mut hashes: HashMap<blake3::Hash, ChunkId> = HashMap::new();
    let mut out = DedupeOutcome::default();

    for cand in candidates {
        let same_file = by_file.get(&cand.chunk.file_path).map(Vec::as_slice).unwrap_or(&[]);
        let mut verdict: Option<(DropReason, Option<ChunkId>)> = None;
        if same_file.len() >= max_per_file {
            verdict = Some((DropReason::FileCap, same_file.first().map(|&i| out.kept[i].chunk.id.clone())));
        } else if policy == DedupePolicy::FileOverlap {
            let hash = content_hash(&cand.chunk.content);
            if let Some(owner) = hashes.get(&hash) {
                verdict = Some((DropReason::DuplicateContent, Some(owner.clone())));
            } else if let Some(&i) = same_file.iter().find(|&&i| overlap_ratio(&out.kept[i].chunk, &cand.chunk) > overlap_threshold) {
                verdict = Some((DropReason::LineOverlap, Some(out.kept[i].chunk.id.clone())));
            }
        }
        match verdict {
            Some((reason, kept)) => {
                tracing::debug!(chunk = %cand.chunk.id, file = %cand.chunk.file_path, reason = ?reason, kept = ?kept, "dedupe drop");
                out.drops.push(DedupeDrop { chunk_id: cand.chunk.id.clone(), file_path: cand.chunk.file_path.clone(), reason, kept });
            }
            None => {
                if policy == DedupePolicy::FileOverlap { hashes.insert(content_hash(&cand.chunk.content), cand.chunk.id.clone()); }
                by_file.entry(cand.chunk.file_path.clone()).or_default().push(out.kept.len());
                out.kept.push(cand);
            }
        }
    }
    out
}
