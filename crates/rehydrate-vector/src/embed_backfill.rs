use futures::stream::{self, StreamExt};

use rehydrate_core::error::Result;
use rehydrate_core::traits::EmbeddingProvider;
use rehydrate_core::types::Chunk;

/// Fill in `embedding` for chunks that arrive without one.
///
/// Runs at most `concurrency` provider calls at a time. A provider returning
/// no vector leaves the chunk unembedded. Returns how many chunks gained a
/// vector.
pub async fn backfill_embeddings(chunks: &mut [Chunk], provider: &dyn EmbeddingProvider, concurrency: usize) -> Result<usize> {
	let pending: Vec<(usize, String)> = chunks
		.iter()
		.enumerate()
		.filter(|(_, c)| c.embedding.is_none())
		.map(|(i, c)| (i, c.content.clone()))
		.collect();
	if pending.is_empty() { return Ok(0); }
	let results: Vec<(usize, Result<Option<Vec<f32>>>)> = stream::iter(pending)
		.map(|(i, text)| async move { (i, provider.embed(&text).await) })
		.buffer_unordered(concurrency.max(1))
		.collect()
		.await;
	let mut filled = 0usize;
	for (i, res) in results {
		if let Some(v) = res? {
			chunks[i].embedding = Some(v);
			filled += 1;
		}
	}
	tracing::info!(filled, embedder = provider.embedder_id(), "embedding backfill done");
	Ok(filled)
}
