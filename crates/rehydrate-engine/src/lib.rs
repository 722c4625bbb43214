//! rehydrate-engine
//!
//! Assembles a token-bounded context bundle for `(role, query)`: anchor-aware
//! query expansion, concurrent lexical + vector search fused with RRF,
//! entity-driven secondary recall, deduplication, four-slot packing and a
//! non-blocking self-critique, all under one request deadline.
pub mod adapters;
pub mod anchors;
pub mod budget;
pub mod critique;
pub mod dedupe;
pub mod engine;
pub mod entities;
pub mod expansion;
pub mod fusion;
pub mod pool;
pub mod store;

pub use adapters::{rank_hits, LexicalAdapter, SearchBudget, SearchOutcome, VectorAdapter};
pub use anchors::{AnchorResolution, AnchorResolver};
pub use budget::{Assembly, BundleAssembler, PINNED_TOKEN_CAP};
pub use critique::{BundleObserver, CritiqueReport, SelfCritique};
pub use dedupe::{deduplicate, DedupeOutcome};
pub use engine::{Rehydrator, RehydratorBuilder};
pub use entities::{related_k, Entity, EntityExtractor, EntityKind, EntityMatcher, RegexMatcher};
pub use fusion::{lexical_only, reciprocal_rank_fusion, DEFAULT_K0};
pub use pool::ConnectionPool;
pub use store::LocalChunkStore;
