//! Shared error and category types used across the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of texts sent to the embedding service per request.
pub const EMBED_BATCH_SIZE: usize = 100;

/// Number of vectors uploaded to the index per request.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Embedding width used when nothing else is configured.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Crate-wide error type.
///
/// Store failures keep connectivity distinct from validation so callers can
/// tell "the index is down" apart from "this request is malformed".
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Transport-level HTTP failure (connect, timeout, TLS, body decode).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A fetched page could not be turned into a usable document.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Chunking could not produce output for a document.
    #[error("chunking failed: {0}")]
    Chunking(String),

    /// The embedding service returned an unusable response.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector index could not be reached.
    #[error("vector index unreachable: {0}")]
    StoreUnavailable(String),

    /// The vector index understood the request and refused it.
    #[error("vector index rejected request: {0}")]
    StoreRejected(String),

    /// Invalid or missing configuration, reported before any network call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure while reading configuration or fixtures.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl PipelineError {
    /// True for failures that mean the backing service is unreachable rather
    /// than the request being wrong.
    pub fn is_connectivity(&self) -> bool {
        match self {
            PipelineError::StoreUnavailable(_) => true,
            PipelineError::Http(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }
}

/// Content categories assigned by the classifier.
///
/// The wire form is snake_case (`api_reference`), matching both the
/// classification config and the metadata stored alongside vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    ApiReference,
    Tutorial,
    Guide,
    CodeExample,
    /// Fallback when no classification rule matches.
    General,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::ApiReference => "api_reference",
            ContentCategory::Tutorial => "tutorial",
            ContentCategory::Guide => "guide",
            ContentCategory::CodeExample => "code_example",
            ContentCategory::General => "general",
        }
    }

    /// Parses the snake_case wire form. Unknown strings yield `None` so the
    /// caller decides whether to reject or ignore the value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "api_reference" => Some(ContentCategory::ApiReference),
            "tutorial" => Some(ContentCategory::Tutorial),
            "guide" => Some(ContentCategory::Guide),
            "code_example" => Some(ContentCategory::CodeExample),
            "general" => Some(ContentCategory::General),
            _ => None,
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
