use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::RwLock;

use rehydrate_core::error::{Error, Result};
use rehydrate_core::traits::VectorIndexer;
use rehydrate_core::types::{Chunk, ChunkId, SearchHit, SourceKind};

/// Exact (brute-force) cosine index over precomputed chunk embeddings.
///
/// Vectors are normalized on insert. Entries whose dimension differs from the
/// query are skipped at search time, as are zero vectors. Only positive
/// similarities are returned.
#[derive(Default)]
pub struct MemoryVectorIndex {
	vectors: RwLock<BTreeMap<ChunkId, Vec<f32>>>,
}

fn lock_err() -> Error { Error::Search("vector index lock poisoned".into()) }

pub fn l2_normalize(v: &[f32]) -> Option<Vec<f32>> {
	let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
	if !norm.is_finite() || norm == 0.0 { return None; }
	Some(v.iter().map(|x| x / norm).collect())
}

impl MemoryVectorIndex {
	pub fn new() -> Self { Self::default() }

	pub fn len(&self) -> usize { self.vectors.read().map(|v| v.len()).unwrap_or(0) }

	pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl VectorIndexer for MemoryVectorIndex {
	fn index(&self, chunks: &[Chunk]) -> Result<usize> {
		let mut map = self.vectors.write().map_err(|_| lock_err())?;
		let mut n = 0usize;
		for c in chunks {
			match c.embedding.as_deref().and_then(l2_normalize) {
				Some(v) => { map.insert(c.id.clone(), v); n += 1; }
				// re-ingested without a vector: no longer searchable by similarity
				None => { map.remove(&c.id); }
			}
		}
		tracing::debug!(indexed = n, total = map.len(), "vector index updated");
		Ok(n)
	}

	fn search_vec(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>> {
		if k == 0 { return Ok(Vec::new()); }
		let Some(q) = l2_normalize(query_vec) else { return Ok(Vec::new()) };
		let map = self.vectors.read().map_err(|_| lock_err())?;
		let mut hits: Vec<SearchHit> = map
			.iter()
			.filter(|(_, v)| v.len() == q.len())
			.map(|(id, v)| SearchHit { id: id.clone(), score: v.iter().zip(&q).map(|(a, b)| a * b).sum(), source: SourceKind::Vector })
			.filter(|h| h.score.is_finite() && h.score > 0.0)
			.collect();
		hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.id.cmp(&b.id)));
		hits.truncate(k);
		Ok(hits)
	}
}
