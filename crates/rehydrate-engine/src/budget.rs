//! Four-slot packing under a hard token cap.
//!
//! 1. pinned invariants, at most [`PINNED_TOKEN_CAP`] tokens, head kept on overflow
//! 2. anchor priors: upstream influence only, no tokens here
//! 3. evidence: best-fit, skip-if-too-large, within `evidence_share` of the rest
//! 4. recency: whatever `recency_share` allows of what is left
use std::collections::HashSet;

use rehydrate_core::bundle::{EvidenceItem, PackOutcome, PackingDecision, PinnedSection, Slot};
use rehydrate_core::config::RehydrateConfig;
use rehydrate_core::snapshot::PinnedInvariant;
use rehydrate_core::traits::TokenCounter;
use rehydrate_core::types::{Chunk, ScoredChunk};

pub const PINNED_TOKEN_CAP: usize = 200;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub pinned: PinnedSection,
    pub anchor_influenced: Vec<EvidenceItem>,
    pub semantic: Vec<EvidenceItem>,
    pub recency: Vec<EvidenceItem>,
    pub total_tokens: usize,
    pub decisions: Vec<PackingDecision>,
}

fn share(tokens: usize, fraction: f32) -> usize { (tokens as f64 * fraction as f64).floor() as usize }

pub struct BundleAssembler<'a> {
    counter: &'a dyn TokenCounter,
    token_budget: usize,
    evidence_share: f32,
    recency_share: f32,
}

impl<'a> BundleAssembler<'a> {
    pub fn new(counter: &'a dyn TokenCounter, cfg: &RehydrateConfig) -> Self {
        Self { counter, token_budget: cfg.token_budget, evidence_share: cfg.evidence_share, recency_share: cfg.recency_share }
    }

    /// `evidence` must be in rank order; `recency` newest first. Recency
    /// chunks already packed as evidence are left out.
    pub fn assemble(&self, pinned: &[PinnedInvariant], evidence: &[ScoredChunk], recency: &[Chunk]) -> Assembly {
        let mut out = Assembly::default();
        out.pinned = self.pack_pinned(pinned, PINNED_TOKEN_CAP.min(self.token_budget), &mut out.decisions);
        let rest = self.token_budget - out.pinned.tokens;

        let evidence_cap = share(rest, self.evidence_share);
        let mut used = 0usize;
        for sc in evidence {
            if used >= evidence_cap { break; }
            let Some(tokens) = self.fit(Slot::Evidence, &sc.chunk.id, &sc.chunk.content, evidence_cap - used, &mut out.decisions) else { continue };
            used += tokens;
            let item = EvidenceItem::from_scored(sc, tokens);
            if sc.anchor_boost > 0.0 { out.anchor_influenced.push(item) } else { out.semantic.push(item) }
        }

        let spent = out.pinned.tokens + used;
        let recency_cap = share(rest, self.recency_share).min(self.token_budget - spent);
        let mut recency_used = 0usize;
        if recency_cap > 0 {
            let taken: HashSet<&str> = out.anchor_influenced.iter().chain(&out.semantic).map(|e| e.chunk_id.as_str()).collect();
            for (i, c) in recency.iter().filter(|c| !taken.contains(c.id.as_str())).enumerate() {
                if recency_used >= recency_cap { break; }
                let Some(tokens) = self.fit(Slot::Recency, &c.id, &c.content, recency_cap - recency_used, &mut out.decisions) else { continue };
                recency_used += tokens;
                out.recency.push(EvidenceItem::from_chunk(c, tokens, i + 1));
            }
        }
        out.total_tokens = spent + recency_used;
        debug_assert!(out.total_tokens <= self.token_budget);
        out
    }

    /// Count `content`; pack it if it fits in `room`, otherwise record the skip.
    fn fit(&self, slot: Slot, id: &str, content: &str, room: usize, decisions: &mut Vec<PackingDecision>) -> Option<usize> {
        let (tokens, outcome) = match self.counter.count(content) {
            Ok(t) if t <= room => (Some(t), PackOutcome::Packed),
            Ok(t) => (Some(t), PackOutcome::SkippedTooLarge),
            Err(e) => {
                tracing::warn!(slot = ?slot, item = id, error = %e, "token count failed; candidate skipped");
                (None, PackOutcome::SkippedTokenizationFailure)
            }
        };
        tracing::debug!(slot = ?slot, item = id, tokens = ?tokens, outcome = ?outcome, "packing decision");
        decisions.push(PackingDecision { slot, item_id: id.to_string(), tokens, outcome });
        (outcome == PackOutcome::Packed).then_some(tokens).flatten()
    }

    fn pack_pinned(&self, pinned: &[PinnedInvariant], cap: usize, decisions: &mut Vec<PackingDecision>) -> PinnedSection {
        let mut section = PinnedSection::default();
        for inv in pinned {
            let candidate = if section.text.is_empty() { inv.text.clone() } else { format!("{}\n{}", section.text, inv.text) };
            match self.counter.count(&candidate) {
                Ok(t) if t <= cap => {
                    decisions.push(PackingDecision { slot: Slot::Pinned, item_id: inv.id.clone(), tokens: Some(t - section.tokens.min(t)), outcome: PackOutcome::Packed });
                    section.text = candidate;
                    section.tokens = t;
                    section.included.push(inv.id.clone());
                }
                Ok(_) => {
                    if let Some((text, t)) = self.longest_prefix(&section.text, &inv.text, cap) {
                        decisions.push(PackingDecision { slot: Slot::Pinned, item_id: inv.id.clone(), tokens: Some(t - section.tokens.min(t)), outcome: PackOutcome::Truncated });
                        section.text = text;
                        section.tokens = t;
                        section.included.push(inv.id.clone());
                    } else {
                        decisions.push(PackingDecision { slot: Slot::Pinned, item_id: inv.id.clone(), tokens: None, outcome: PackOutcome::SkippedTooLarge });
                    }
                    section.truncated = true;
                    tracing::debug!(invariant = %inv.id, cap, "pinned section truncated");
                    break;
                }
                Err(e) => {
                    tracing::warn!(invariant = %inv.id, error = %e, "token count failed; pinned invariant skipped");
                    decisions.push(PackingDecision { slot: Slot::Pinned, item_id: inv.id.clone(), tokens: None, outcome: PackOutcome::SkippedTokenizationFailure });
                }
            }
        }
        section
    }

    /// Longest word prefix of `text` that still fits after `head`.
    fn longest_prefix(&self, head: &str, text: &str, cap: usize) -> Option<(String, usize)> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let join = |n: usize| {
            let prefix = words[..n].join(" ");
            if head.is_empty() { prefix } else { format!("{}\n{}", head, prefix) }
        };
        let (mut lo, mut hi) = (0usize, words.len());
        let mut best: Option<(String, usize)> = None;
        // token counts grow with the prefix, so binary search on word count
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            let candidate = join(mid);
            match self.counter.count(&candidate) {
                Ok(t) if t <= cap => { best = Some((candidate, t)); lo = mid; }
                _ => hi = mid - 1,
            }
        }
        best
    }
}
