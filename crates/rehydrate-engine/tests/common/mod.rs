#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rehydrate_core::error::Result;
use rehydrate_core::snapshot::{ContextSnapshot, PinnedInvariant};
use rehydrate_core::traits::ChunkStore;
use rehydrate_core::types::{AnchorMetadata, Chunk, ChunkId, Role, SearchHit};
use rehydrate_embed::HashEmbedder;
use rehydrate_engine::{ConnectionPool, LocalChunkStore, Rehydrator};
use rehydrate_vector::backfill_embeddings;

pub const EMBED_DIM: usize = 1024;

/// Wraps the reference store: counts search calls, remembers vector hits and
/// can delay the lexical call or refuse connections.
pub struct ScriptedStore {
    inner: LocalChunkStore,
    lexical_calls: AtomicUsize,
    vector_calls: AtomicUsize,
    lexical_delay: Mutex<Option<Duration>>,
    vector_ids: Mutex<BTreeSet<ChunkId>>,
}

impl ScriptedStore {
    pub fn delay_lexical(&self, d: Duration) { *self.lexical_delay.lock().expect("lock") = Some(d); }

    pub fn refuse_connections(&self) { self.inner.pool().close(); }

    pub fn lexical_calls(&self) -> usize { self.lexical_calls.load(Ordering::SeqCst) }

    pub fn vector_calls(&self) -> usize { self.vector_calls.load(Ordering::SeqCst) }

    pub fn search_calls(&self) -> usize { self.lexical_calls() + self.vector_calls() }

    pub fn reset_calls(&self) {
        self.lexical_calls.store(0, Ordering::SeqCst);
        self.vector_calls.store(0, Ordering::SeqCst);
    }

    pub fn vector_ids(&self) -> BTreeSet<ChunkId> { self.vector_ids.lock().expect("lock").clone() }
}

#[async_trait]
impl ChunkStore for ScriptedStore {
    async fn ping(&self) -> Result<()> { self.inner.ping().await }

    async fn query_lexical(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.lexical_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.lexical_delay.lock().expect("lock");
        if let Some(d) = delay { tokio::time::sleep(d).await; }
        self.inner.query_lexical(text, k).await
    }

    async fn query_vector(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        let hits = self.inner.query_vector(embedding, k).await?;
        self.vector_ids.lock().expect("lock").extend(hits.iter().map(|h| h.id.clone()));
        Ok(hits)
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> { self.inner.get_chunk(id).await }

    async fn recent_chunks(&self, limit: usize) -> Result<Vec<Chunk>> { self.inner.recent_chunks(limit).await }

    async fn get_chunks(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> { self.inner.get_chunks(ids).await }
}

pub fn chunk(id: &str, path: &str, index: usize, lines: (u32, u32), content: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        document_id: path.to_string(),
        chunk_index: index,
        file_path: path.to_string(),
        line_start: lines.0,
        line_end: lines.1,
        content: content.to_string(),
        embedding: None,
        anchor: None,
        updated_at: None,
        metadata: HashMap::new(),
    }
}

pub fn anchor(key: &str, priority: u32, roles: &[&str]) -> AnchorMetadata {
    AnchorMetadata { key: key.to_string(), priority, role_pins: roles.iter().map(|r| r.parse::<Role>().expect("role")).collect() }
}

pub fn corpus() -> Vec<Chunk> {
    let mut hybrid0 = chunk("hybrid-0", "src/store/hybrid.rs", 0, (1, 30), "HybridVectorStore combines a lexical index and a vector index. Implement the HybridVectorStore by wiring query_lexical and query_vector behind one pool.");
    hybrid0.anchor = Some(anchor("HybridVectorStore", 5, &["implementer"]));
    let hybrid1 = chunk("hybrid-1", "src/store/hybrid.rs", 1, (25, 60), "HybridVectorStore::search merges ranked lists with reciprocal rank fusion.");
    let fusion = chunk("fusion-0", "docs/fusion.md", 0, (1, 12), "Reciprocal rank fusion sums 1/(k0 + rank) across the vector and lexical lists.");
    let mut roadmap = chunk("roadmap-0", "docs/planning.md", 0, (1, 20), "RoadmapPlanning: milestones for the next offline release.");
    roadmap.anchor = Some(anchor("RoadmapPlanning", 2, &["planner"]));
    let fire = chunk("fire-0", "docs/fire.md", 0, (1, 15), "Firecraft basics: tinder, kindling and fuel.");
    let water = chunk("water-0", "docs/water.md", 0, (1, 15), "Water filtration with sand and charcoal.");
    let entities = chunk("entities-0", "docs/entities.md", 0, (1, 18), "Entity expansion looks up use_entity_expansion and HybridVectorStore mentions in src/store/hybrid.rs.");
    let mut changelog = chunk("changelog-0", "CHANGELOG.md", 0, (1, 8), "Changed: token budget defaults to 1200 tokens.");
    changelog.updated_at = Some(Utc.with_ymd_and_hms(2026, 9, 30, 12, 0, 0).single().expect("date"));
    let mut older = chunk("changelog-1", "CHANGELOG.md", 1, (9, 16), "Added: recency slot for recently changed chunks.");
    older.updated_at = Some(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).single().expect("date"));
    vec![hybrid0, hybrid1, fusion, roadmap, fire, water, entities, changelog, older]
}

pub fn snapshot(chunks: &[Chunk]) -> ContextSnapshot {
    ContextSnapshot::new(
        3,
        vec![
            PinnedInvariant { id: "mission".into(), text: "Offline-first assistant; never call remote services.".into() },
            PinnedInvariant { id: "style".into(), text: "Answer with file paths and line numbers.".into() },
        ],
        Vec::new(),
    )
    .with_chunk_anchors(chunks)
}

pub fn embedder() -> Arc<HashEmbedder> { Arc::new(HashEmbedder::new(EMBED_DIM)) }

pub async fn scripted_store(mut chunks: Vec<Chunk>) -> Arc<ScriptedStore> {
    backfill_embeddings(&mut chunks, embedder().as_ref(), 4).await.expect("backfill");
    let inner = LocalChunkStore::in_memory(ConnectionPool::new(4, Duration::from_millis(500))).expect("store");
    inner.ingest(&chunks).expect("ingest");
    Arc::new(ScriptedStore {
        inner,
        lexical_calls: AtomicUsize::new(0),
        vector_calls: AtomicUsize::new(0),
        lexical_delay: Mutex::new(None),
        vector_ids: Mutex::new(BTreeSet::new()),
    })
}

pub async fn engine() -> (Rehydrator, Arc<ScriptedStore>) {
    let chunks = corpus();
    let snap = snapshot(&chunks);
    let store = scripted_store(chunks).await;
    let engine = Rehydrator::builder(store.clone()).embedder(embedder()).snapshot(snap).build().expect("engine");
    (engine, store)
}
