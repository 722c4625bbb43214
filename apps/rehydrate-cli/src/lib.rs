use anyhow::Context;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use rehydrate_core::snapshot::ContextSnapshot;
use rehydrate_core::types::Chunk;
use rehydrate_embed::{CachingEmbedder, HashEmbedder};
use rehydrate_engine::{ConnectionPool, LocalChunkStore};
use rehydrate_vector::backfill_embeddings;

pub const EMBED_CACHE_CAPACITY: usize = 4096;
pub const BACKFILL_CONCURRENCY: usize = 8;

/// Log to stderr, filtered by `RUST_LOG` (default `info`). `REHYDRATE_LOG_JSON=1`
/// switches to one JSON object per event.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("REHYDRATE_LOG_JSON").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    // a subscriber may already be installed when embedded in another process
    let _ = if json { builder.json().try_init() } else { builder.try_init() };
}

/// One serialized `Chunk` per line; blank lines are ignored.
pub fn load_corpus(path: &Path) -> anyhow::Result<Vec<Chunk>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading corpus {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| serde_json::from_str::<Chunk>(l).with_context(|| format!("{}:{}: invalid chunk", path.display(), i + 1)))
        .collect()
}

/// Snapshot from `path` if given, otherwise an empty one; anchors carried by
/// the corpus are merged in either way.
pub fn load_snapshot(path: Option<&Path>, chunks: &[Chunk]) -> anyhow::Result<ContextSnapshot> {
    let snapshot = match path {
        Some(p) => ContextSnapshot::load(p).with_context(|| format!("loading snapshot {}", p.display()))?,
        None => ContextSnapshot::default(),
    };
    Ok(snapshot.with_chunk_anchors(chunks))
}

/// Fill missing embeddings with the hashing embedder and load everything
/// into an in-memory store.
pub async fn build_store(mut chunks: Vec<Chunk>, embedder: Arc<CachingEmbedder>) -> anyhow::Result<LocalChunkStore> {
    let filled = backfill_embeddings(&mut chunks, embedder.as_ref(), BACKFILL_CONCURRENCY).await?;
    let store = LocalChunkStore::in_memory(ConnectionPool::default())?;
    let embedded = store.ingest(&chunks)?;
    tracing::info!(chunks = chunks.len(), backfilled = filled, embedded, "corpus loaded");
    Ok(store)
}

pub fn default_embedder() -> Arc<CachingEmbedder> {
    Arc::new(CachingEmbedder::new(Arc::new(HashEmbedder::default()), EMBED_CACHE_CAPACITY))
}
