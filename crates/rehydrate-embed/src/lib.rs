//! rehydrate-embed
//!
//! Embedding providers and token counters. The engine never computes real
//! model embeddings; the hashing embedder gives fast, deterministic vectors
//! for development and tests, and [`CachingEmbedder`] fronts any provider.
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use twox_hash::XxHash64;

use rehydrate_core::error::{Error, Result};
use rehydrate_core::traits::EmbeddingProvider;

pub mod tokenize;

pub use tokenize::{counter_from_path, HeuristicTokenCounter, HfTokenCounter};

pub const DEFAULT_DIM: usize = 256;

/// Deterministic bag-of-words embedder (signed feature hashing): every
/// lowercase alphanumeric term adds ±1 to one of `dim` buckets, then the
/// vector is L2-normalized. Texts sharing no term score close to zero.
/// Text without any term has no embedding.
pub struct HashEmbedder { dim: usize, id: String }

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("hash:xx64:d{}", dim) }
    }

    pub fn embed_sync(&self, text: &str) -> Option<Vec<f32>> {
        let mut v = vec![0f32; self.dim];
        let mut seen = false;
        for term in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(0);
            term.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            v[idx] += if h >> 63 == 1 { -1.0 } else { 1.0 };
            seen = true;
        }
        if !seen { return None; }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        // one term hashed twice with opposite signs can cancel out
        if norm == 0.0 { return None; }
        for x in &mut v { *x /= norm; }
        Some(v)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self { Self::new(DEFAULT_DIM) }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> { Ok(self.embed_sync(text)) }
}

/// Provider that never has an embedding; turns the vector list off without
/// touching the fusion settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEmbedder;

#[async_trait]
impl EmbeddingProvider for NoEmbedder {
    fn embedder_id(&self) -> &str { "none" }
    fn dim(&self) -> usize { 0 }
    async fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>> { Ok(None) }
}

/// In-process embedding cache keyed by `(content_hash, embedder_id)`.
///
/// Absent embeddings are cached too, so a provider that has nothing for a
/// text is not asked again. Once `capacity` entries are held the oldest
/// insert is evicted first.
pub struct CachingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: RwLock<EmbedCache>,
    capacity: usize,
}

#[derive(Default)]
struct EmbedCache {
    entries: HashMap<String, Option<Vec<f32>>>,
    order: VecDeque<String>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        Self { inner, cache: RwLock::new(EmbedCache::default()), capacity }
    }

    pub fn len(&self) -> usize { self.cache.read().map(|c| c.entries.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn content_hash(text: &str) -> String { blake3::hash(text.as_bytes()).to_hex().to_string() }
}

#[async_trait]
impl EmbeddingProvider for CachingEmbedder {
    fn embedder_id(&self) -> &str { self.inner.embedder_id() }
    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let key = Self::content_hash(text);
        {
            let cache = self.cache.read().map_err(|_| Error::Embedding("embedding cache lock poisoned".into()))?;
            if let Some(hit) = cache.entries.get(&key) { return Ok(hit.clone()); }
        }
        let fresh = self.inner.embed(text).await?;
        if self.capacity == 0 { return Ok(fresh); }
        let mut cache = self.cache.write().map_err(|_| Error::Embedding("embedding cache lock poisoned".into()))?;
        // another task may have filled the same key while we were embedding
        if cache.entries.contains_key(&key) { return Ok(fresh); }
        while cache.entries.len() >= self.capacity {
            let Some(oldest) = cache.order.pop_front() else { break };
            cache.entries.remove(&oldest);
            tracing::trace!(embedder = self.inner.embedder_id(), capacity = self.capacity, "evicted cached embedding");
        }
        cache.order.push_back(key.clone());
        cache.entries.insert(key, fresh.clone());
        Ok(fresh)
    }
}
