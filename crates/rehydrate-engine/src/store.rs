use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use rehydrate_core::error::{Error, Result};
use rehydrate_core::traits::{ChunkStore, TextIndexer, VectorIndexer};
use rehydrate_core::types::{Chunk, ChunkId, SearchHit};
use rehydrate_text::TantivyIndexer;
use rehydrate_vector::MemoryVectorIndex;

use crate::pool::ConnectionPool;

#[derive(Default)]
struct ChunkTable {
    by_id: HashMap<ChunkId, Chunk>,
    by_position: HashMap<(String, usize), ChunkId>,
}

/// Reference chunk store: BM25 text index, cosine vector index and a chunk
/// table behind a bounded connection pool.
pub struct LocalChunkStore<TI = TantivyIndexer, VI = MemoryVectorIndex> where TI: TextIndexer, VI: VectorIndexer {
    text: TI,
    vector: VI,
    table: RwLock<ChunkTable>,
    pool: ConnectionPool,
}

impl LocalChunkStore<TantivyIndexer, MemoryVectorIndex> {
    pub fn in_memory(pool: ConnectionPool) -> Result<Self> {
        Ok(Self::new(TantivyIndexer::in_memory()?, MemoryVectorIndex::new(), pool))
    }
}

fn table_err() -> Error { Error::Operation("chunk table lock poisoned".into()) }

impl<TI, VI> LocalChunkStore<TI, VI> where TI: TextIndexer, VI: VectorIndexer {
    pub fn new(text: TI, vector: VI, pool: ConnectionPool) -> Self {
        Self { text, vector, table: RwLock::new(ChunkTable::default()), pool }
    }

    pub fn pool(&self) -> &ConnectionPool { &self.pool }

    pub fn len(&self) -> usize { self.table.read().map(|t| t.by_id.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Insert or replace chunks. `(file_path, chunk_index)` must stay unique:
    /// a batch that would give one position two different ids is rejected
    /// as a whole. Returns how many chunks got a vector.
    pub fn ingest(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut guard = self.table.write().map_err(|_| table_err())?;
        let table = &mut *guard;
        let mut claimed: HashMap<(String, usize), &str> = HashMap::new();
        for c in chunks {
            let pos = (c.file_path.clone(), c.chunk_index);
            let holder = claimed.get(&pos).copied().or_else(|| table.by_position.get(&pos).map(String::as_str));
            if let Some(other) = holder {
                if other != c.id {
                    return Err(Error::Operation(format!("duplicate position {}#{}: chunk '{}' collides with '{}'", c.file_path, c.chunk_index, c.id, other)));
                }
            }
            claimed.insert(pos, &c.id);
        }
        self.text.index(chunks)?;
        let embedded = self.vector.index(chunks)?;
        for c in chunks {
            if let Some(old) = table.by_id.get(&c.id) {
                let old_pos = (old.file_path.clone(), old.chunk_index);
                table.by_position.remove(&old_pos);
            }
            table.by_position.insert((c.file_path.clone(), c.chunk_index), c.id.clone());
            table.by_id.insert(c.id.clone(), c.clone());
        }
        tracing::info!(chunks = chunks.len(), embedded, total = table.by_id.len(), "ingested chunks");
        Ok(embedded)
    }
}

#[async_trait]
impl<TI, VI> ChunkStore for LocalChunkStore<TI, VI> where TI: TextIndexer, VI: VectorIndexer {
    async fn ping(&self) -> Result<()> {
        let _conn = self.pool.acquire().await?;
        Ok(())
    }

    async fn query_lexical(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let _conn = self.pool.acquire().await?;
        self.text.search(text, k)
    }

    async fn query_vector(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let _conn = self.pool.acquire().await?;
        self.vector.search_vec(embedding, k)
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let _conn = self.pool.acquire().await?;
        Ok(self.table.read().map_err(|_| table_err())?.by_id.get(id).cloned())
    }

    async fn recent_chunks(&self, limit: usize) -> Result<Vec<Chunk>> {
        let _conn = self.pool.acquire().await?;
        let table = self.table.read().map_err(|_| table_err())?;
        let mut all: Vec<&Chunk> = table.by_id.values().filter(|c| c.updated_at.is_some()).collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().take(limit).cloned().collect())
    }

    async fn get_chunks(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        let _conn = self.pool.acquire().await?;
        let table = self.table.read().map_err(|_| table_err())?;
        Ok(ids.iter().filter_map(|id| table.by_id.get(id).cloned()).collect())
    }
}
