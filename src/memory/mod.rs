//! Memory engine - embedding generation, caching, batching, retrieval, and rank fusion
//!
//! Orchestrates an external embedding server (HTTP), a pluggable embedding
//! cache, and PostgreSQL-backed similarity search over three record kinds.

pub mod batcher;
pub mod cache;
pub mod embedding;
pub mod extractor;
pub mod ranker;
pub mod service;
pub mod summarizer;
pub mod types;

pub use batcher::EmbeddingBatcher;
pub use cache::{build_cache, EmbeddingCache};
pub use embedding::{Embedder, EmbeddingClient};
pub use extractor::{Extractor, HeuristicExtractor};
pub use ranker::{RankedRecord, RankedResult, Ranker};
pub use service::MemoryService;
pub use summarizer::{LlmClient, Summarizer, SummarizerConfig};
