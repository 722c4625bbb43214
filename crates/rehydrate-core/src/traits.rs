use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, ChunkId, SearchHit};

/// BM25-style lexical index over chunk contents.
pub trait TextIndexer: Send + Sync {
    fn index(&self, chunks: &[Chunk]) -> Result<()>;
    fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// Similarity index over precomputed chunk embeddings. Chunks without an
/// embedding are not indexed and therefore never returned.
pub trait VectorIndexer: Send + Sync {
    fn index(&self, chunks: &[Chunk]) -> Result<usize>;
    fn search_vec(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>>;
}

/// External embedding provider: `text -> vector | absent`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hash:xx64:d256`).
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    /// `Ok(None)` means no embedding is available; that is not an error.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;
}

/// Token-count estimation used by every budget decision of a request.
pub trait TokenCounter: Send + Sync {
    fn name(&self) -> &str;
    fn count(&self, text: &str) -> Result<usize>;
}

/// Narrow interface to the external chunk store.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Check a connection out of the pool and hand it back.
    async fn ping(&self) -> Result<()>;
    async fn query_lexical(&self, text: &str, k: usize) -> Result<Vec<SearchHit>>;
    async fn query_vector(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>>;
    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;
    /// Chunks that carry a change time, most recent first.
    async fn recent_chunks(&self, limit: usize) -> Result<Vec<Chunk>>;

    /// Fetch several chunks; missing ids are left out.
    async fn get_chunks(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(c) = self.get_chunk(id).await? { out.push(c); }
        }
        Ok(out)
    }
}
