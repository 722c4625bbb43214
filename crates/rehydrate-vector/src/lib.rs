//! rehydrate-vector
//!
//! In-memory cosine index backing the chunk store's vector call, plus the
//! embedding backfill used when a corpus arrives without vectors.
pub mod memory;
pub mod embed_backfill;

pub use embed_backfill::backfill_embeddings;
pub use memory::{l2_normalize, MemoryVectorIndex};
