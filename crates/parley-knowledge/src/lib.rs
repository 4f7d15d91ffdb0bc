//! Knowledge base for Parley.
//!
//! - `chunker`: sentence-aware text windowing.
//! - `builder`: URL → extracted article → summary + embedded chunks.
//! - `store`: copy-on-write snapshot store for articles and chunks.
//! - `retrieval`: cosine search over a snapshot, plus the corpus digest.

pub mod builder;
pub mod chunker;
pub mod retrieval;
pub mod store;

pub use builder::{IngestOutcome, IngestReport, KnowledgeBuilder};
pub use retrieval::{RetrievalEngine, SearchResult};
pub use store::{KnowledgeStore, StoreSnapshot};
