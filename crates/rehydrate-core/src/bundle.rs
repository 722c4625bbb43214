//! The assembled context bundle and its trace metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Chunk, ChunkId, ScoredChunk};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinnedSection {
    pub text: String,
    pub tokens: usize,
    /// Ids of the invariants that made it in, in order.
    pub included: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub chunk_id: ChunkId,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    pub tokens: usize,
    pub fused_score: f64,
    pub rank: usize,
    pub anchor_key: Option<String>,
}

impl EvidenceItem {
    pub fn from_scored(sc: &ScoredChunk, tokens: usize) -> Self {
        let mut item = Self::from_chunk(&sc.chunk, tokens, sc.ranked.rank);
        item.fused_score = sc.ranked.fused_score;
        item
    }

    pub fn from_chunk(c: &Chunk, tokens: usize, rank: usize) -> Self {
        Self {
            chunk_id: c.id.clone(),
            file_path: c.file_path.clone(),
            line_start: c.line_start,
            line_end: c.line_end,
            content: c.content.clone(),
            tokens,
            fused_score: 0.0,
            rank,
            anchor_key: c.anchor_key().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    AnchorResolve,
    Lexical,
    Vector,
    Fusion,
    Hydrate,
    EntityExpansion,
    Dedupe,
    Recency,
    Packing,
    Critique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    TimedOut,
    Failed,
    Skipped,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::AnchorResolve => "anchor_resolve",
            Self::Lexical => "lexical",
            Self::Vector => "vector",
            Self::Fusion => "fusion",
            Self::Hydrate => "hydrate",
            Self::EntityExpansion => "entity_expansion",
            Self::Dedupe => "dedupe",
            Self::Recency => "recency",
            Self::Packing => "packing",
            Self::Critique => "critique",
        })
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Completed => "completed", Self::TimedOut => "timed_out", Self::Failed => "failed", Self::Skipped => "skipped" })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    pub stage: Stage,
    pub status: StageStatus,
    pub elapsed_ms: u64,
    pub count: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    FileCap,
    LineOverlap,
    DuplicateContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupeDrop {
    pub chunk_id: ChunkId,
    pub file_path: String,
    pub reason: DropReason,
    /// The already-selected chunk that caused the drop, if any.
    pub kept: Option<ChunkId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Pinned,
    Evidence,
    Recency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackOutcome {
    Packed,
    Truncated,
    SkippedTooLarge,
    SkippedTokenizationFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingDecision {
    pub slot: Slot,
    pub item_id: String,
    pub tokens: Option<usize>,
    pub outcome: PackOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedAnchor {
    pub key: String,
    pub priority: u32,
    pub role_pinned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RehydrateTrace {
    pub snapshot_version: u64,
    pub role: String,
    pub expanded_query: Option<String>,
    pub matched_anchors: Vec<MatchedAnchor>,
    pub entities: Vec<String>,
    pub k_related: Option<usize>,
    pub stages: Vec<StageTrace>,
    pub dedupe_drops: Vec<DedupeDrop>,
    pub packing: Vec<PackingDecision>,
    /// Store search calls issued (lexical + vector), primary and secondary.
    pub search_calls: usize,
}

impl RehydrateTrace {
    pub fn stage(&self, stage: Stage) -> Option<&StageTrace> { self.stages.iter().find(|s| s.stage == stage) }

    pub fn stage_status(&self, stage: Stage) -> Option<StageStatus> { self.stage(stage).map(|s| s.status) }
}

/// One instance per call; immutable once returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub pinned_section: PinnedSection,
    pub anchor_influenced_evidence: Vec<EvidenceItem>,
    pub semantic_evidence: Vec<EvidenceItem>,
    pub recency_section: Vec<EvidenceItem>,
    pub total_tokens: usize,
    pub token_budget: usize,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    pub trace: RehydrateTrace,
}

impl Bundle {
    /// All ranked evidence (anchor-influenced and semantic) in rank order.
    pub fn evidence(&self) -> Vec<&EvidenceItem> {
        let mut all: Vec<&EvidenceItem> = self.anchor_influenced_evidence.iter().chain(self.semantic_evidence.iter()).collect();
        all.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        all
    }

    pub fn evidence_count(&self) -> usize { self.anchor_influenced_evidence.len() + self.semantic_evidence.len() }

    /// Ids of every chunk in the bundle: evidence first, then recency.
    pub fn chunk_ids(&self) -> Vec<&str> {
        self.evidence().into_iter().chain(self.recency_section.iter()).map(|e| e.chunk_id.as_str()).collect()
    }
}
