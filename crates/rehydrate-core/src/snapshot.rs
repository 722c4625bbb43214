//! Versioned, immutable context snapshot injected into the engine.
//!
//! Holds the pinned invariants (always-present micro-summaries) and the anchor
//! registry. A new version is published by building a new snapshot value; the
//! engine never mutates one in place.
use figment::{
    providers::{Format, Json, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::types::{AnchorMetadata, Chunk};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedInvariant {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSnapshot {
    pub version: u64,
    pub pinned: Vec<PinnedInvariant>,
    pub anchors: Vec<AnchorMetadata>,
}

impl ContextSnapshot {
    pub fn new(version: u64, pinned: Vec<PinnedInvariant>, anchors: Vec<AnchorMetadata>) -> Self {
        Self { version, pinned, anchors }
    }

    /// Load a snapshot from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Figment::from(Json::file(path)),
            _ => Figment::from(Toml::file(path)),
        };
        Ok(figment.extract()?)
    }

    /// Add anchors carried by ingested chunks. Entries already in the
    /// snapshot win over chunk-level metadata with the same key.
    pub fn with_chunk_anchors<'a, I>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let mut by_key: BTreeMap<String, AnchorMetadata> = BTreeMap::new();
        for c in chunks {
            if let Some(a) = &c.anchor {
                by_key.entry(a.key.clone()).or_insert_with(|| a.clone());
            }
        }
        for a in &self.anchors { by_key.remove(&a.key); }
        self.anchors.extend(by_key.into_values());
        self
    }

    pub fn anchor(&self, key: &str) -> Option<&AnchorMetadata> { self.anchors.iter().find(|a| a.key == key) }
}
