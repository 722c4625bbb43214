//! Domain types shared by the store, the adapters and the rehydration engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::config::RehydrateConfig;
use crate::error::Error;

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

/// Caller role, e.g. `planner`, `coder`, `implementer`.
///
/// Stored lowercase; only ASCII alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role(String);

impl Role {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let role = s.trim().to_ascii_lowercase();
        if role.is_empty() {
            return Err(Error::InvalidConfig("role must not be empty".into()));
        }
        if !role.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::InvalidConfig(format!("invalid role '{}'", s)));
        }
        Ok(Self(role))
    }
}

impl TryFrom<String> for Role {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<Role> for String {
    fn from(r: Role) -> Self { r.0 }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Structured anchor metadata attached to a chunk at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorMetadata {
    pub key: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub role_pins: BTreeSet<Role>,
}

impl AnchorMetadata {
    pub fn is_pinned_to(&self, role: &Role) -> bool { self.role_pins.contains(role) }
}

/// A chunk of a source document as written by the ingestion pipeline.
///
/// - `id`: globally unique chunk identifier
/// - `document_id`: stable document identity
/// - `file_path`/`chunk_index`: unique pair, position within the source file
/// - `line_start`/`line_end`: inclusive line span in the source file
/// - `embedding`: precomputed vector, absent when the pipeline produced none
/// - `anchor`: structured anchor metadata, `None` for ordinary chunks
/// - `updated_at`: last change time, drives the recency slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: String,
    pub chunk_index: usize,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub anchor: Option<AnchorMetadata>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    pub fn is_anchor(&self) -> bool { self.anchor.is_some() }

    pub fn anchor_key(&self) -> Option<&str> { self.anchor.as_ref().map(|a| a.key.as_str()) }

    /// Number of lines covered, never zero.
    pub fn line_span(&self) -> u32 { self.line_end.saturating_sub(self.line_start) + 1 }
}

/// Indicates which search produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vector,
    Lexical,
}

/// The minimal surface returned by the store's search calls.
///
/// `id` matches `Chunk::id`. `score` is engine-specific but higher is always
/// better: BM25 for lexical hits, cosine similarity for vector hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
}

/// One entry of a ranked list. `rank` is 1-based; ties are always broken by
/// ascending `chunk_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_ref: ChunkId,
    pub vector_score: Option<f32>,
    pub lexical_score: Option<f32>,
    pub fused_score: f64,
    pub rank: usize,
}

/// A fused result joined with its chunk, ready for dedupe and packing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub ranked: RankedResult,
    /// Score added by a role-pinned anchor match; zero when not influenced.
    pub anchor_boost: f64,
}

impl ScoredChunk {
    pub fn id(&self) -> &str { &self.chunk.id }
    pub fn score(&self) -> f64 { self.ranked.fused_score }
}

/// Ephemeral per-call context. Never persisted.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub raw_query: String,
    pub role: Role,
    pub config: RehydrateConfig,
}

impl QueryContext {
    pub fn stability(&self) -> f32 { self.config.stability }
}
