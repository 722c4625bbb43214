use rehydrate_core::traits::{EmbeddingProvider, TokenCounter};
use rehydrate_embed::{HashEmbedder, HeuristicTokenCounter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let embedder = HashEmbedder::default();
    let counter = HeuristicTokenCounter;
    for text in ["hello world", "How do I implement HybridVectorStore?"] {
        let emb = embedder.embed(text).await?;
        println!("{:>40} -> dim={} tokens={}", text, emb.map(|v| v.len()).unwrap_or(0), counter.count(text)?);
    }
    Ok(())
}
