//! Ingestion: crawling documentation sites and turning pages into chunks.
//!
//! The submodules cover the three ingest stages:
//!
//! * [`fetcher`] — polite breadth-first crawler with selector-based
//!   title/content/code extraction.
//! * [`classify`] — indicator-count classification into content categories.
//! * [`chunker`] — category-specific chunk strategies with overlap.

pub mod chunker;
pub mod classify;
pub mod fetcher;

pub use chunker::{ChunkMetadata, ChunkingOutcome, DocChunk, DocumentChunker};
pub use classify::ContentClassifier;
pub use fetcher::{CrawlOutcome, DocumentFetcher, FetchedPage};
