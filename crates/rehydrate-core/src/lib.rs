#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod bundle;
pub mod config;
pub mod error;
pub mod snapshot;
pub mod traits;
pub mod types;

pub use bundle::Bundle;
pub use config::{DedupePolicy, ExpandQuery, RehydrateConfig, RehydrateOptions, RequestOverrides};
pub use error::{Error, Result};
pub use snapshot::{ContextSnapshot, PinnedInvariant};
pub use types::{AnchorMetadata, Chunk, ChunkId, QueryContext, RankedResult, Role, ScoredChunk, SearchHit, SourceKind};
