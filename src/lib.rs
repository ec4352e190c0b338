//! ```text
//! ScrapeConfig ─┬─► ingestion::DocumentFetcher ──► FetchedPage
//!               └─► sources::CategoryRule ────────┐
//!                                                 │
//! FetchedPage ──► ingestion::ContentClassifier ──► strategy per category
//!                              │
//!                              └─► ingestion::DocumentChunker ──► DocChunk
//!
//! DocChunk ──► embeddings::EmbeddingEngine ──► vectors
//!                   (hosted API, statistical fallback)
//!
//! DocChunk + vectors ──► stores::VectorIndex ──► hosted REST index
//!
//! Stored vectors ──► retriever::KnowledgeRetriever ──► agent tools
//! ```
//!
pub mod embeddings;
pub mod ingestion;
pub mod pipeline;
pub mod retriever;
pub mod settings;
pub mod sources;
pub mod stores;
pub mod types;

pub use embeddings::EmbeddingEngine;
pub use ingestion::{ContentClassifier, DocumentChunker, DocumentFetcher};
pub use pipeline::{DocsPipeline, HealthReport, PopulateOptions, PopulateReport};
pub use retriever::{KnowledgeRetriever, SearchRequest, SearchResponse};
pub use settings::Settings;
pub use sources::{ChunkStrategy, ScrapeConfig, SourceConfig};
pub use stores::{RestVectorIndex, VectorIndex};
pub use types::{ContentCategory, PipelineError};
