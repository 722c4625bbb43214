//! rehydrate-text
//!
//! Tantivy-based BM25 index backing the chunk store's lexical call.
pub mod tantivy_utils;
pub mod index;

pub use index::TantivyIndexer;
