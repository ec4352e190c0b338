//! Storage layer for chunk embeddings.
//!
//! This module provides a unified [`VectorIndex`] trait that abstracts over
//! hosted vector databases, so the pipeline and retriever can work against
//! any supported backend without being tied to a specific service.
//!
//! # Architecture
//!
//! ```text
//!                   ┌───────────────────┐
//!                   │ VectorIndex trait │
//!                   │   (async CRUD)    │
//!                   └─────────┬─────────┘
//!                             │
//!            ┌────────────────┼────────────────┐
//!            │                │                │
//!            ▼                ▼                ▼
//!     ┌────────────┐  ┌─────────────┐  ┌─────────────┐
//!     │ REST index │  │  (future)   │  │  (future)   │
//!     │ (pinecone- │  │  pgvector   │  │   qdrant    │
//!     │   style)   │  │             │  │             │
//!     └────────────┘  └─────────────┘  └─────────────┘
//! ```
//!
//! # Records
//!
//! [`VectorRecord::from_chunk`] prepares a chunk for upload: the typed chunk
//! metadata becomes the record's metadata JSON, long string fields are
//! clamped, and the chunk text is carried along as `text_content` (for
//! retrieval) and `text_preview` (for result listings).
//!
//! # Supported backends
//!
//! - [`rest::RestVectorIndex`] - reqwest client for a pinecone-style data
//!   plane

pub mod rest;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ingestion::DocChunk;
use crate::types::PipelineError;

pub use rest::RestVectorIndex;

/// Longest chunk text stored with the vector, in characters.
const TEXT_CONTENT_MAX_CHARS: usize = 3000;
/// Length of the short preview attached to every record.
const PREVIEW_CHARS: usize = 200;
/// Clamp applied to every other string field in record metadata.
const METADATA_STRING_MAX_CHARS: usize = 1000;

/// One embedding plus its metadata, ready for upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

impl VectorRecord {
    /// Pairs a chunk with its embedding.
    ///
    /// Chunk metadata fields are clamped to [`METADATA_STRING_MAX_CHARS`];
    /// the chunk text itself is stored as `text_content` (up to
    /// [`TEXT_CONTENT_MAX_CHARS`]) with a `text_preview` for listings.
    pub fn from_chunk(chunk: &DocChunk, values: Vec<f32>) -> Self {
        let mut metadata = match serde_json::to_value(&chunk.metadata) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for value in metadata.values_mut() {
            if let Value::String(text) = value {
                if char_len(text) > METADATA_STRING_MAX_CHARS {
                    *value = Value::String(clamp_chars(text, METADATA_STRING_MAX_CHARS));
                }
            }
        }
        metadata.insert(
            "text_content".to_string(),
            Value::String(truncate_chars(&chunk.content, TEXT_CONTENT_MAX_CHARS)),
        );
        metadata.insert(
            "text_preview".to_string(),
            Value::String(clamp_chars(&chunk.content, PREVIEW_CHARS)),
        );

        Self {
            id: chunk.id.clone(),
            values,
            metadata: Value::Object(metadata),
        }
    }
}

/// One search result row, ordered most-similar first by the backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Value,
}

impl ScoredMatch {
    /// String field from the match metadata, empty when absent.
    pub fn metadata_str(&self, field: &str) -> &str {
        self.metadata
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Unsigned integer field from the match metadata.
    pub fn metadata_u64(&self, field: &str) -> Option<u64> {
        self.metadata.get(field).and_then(Value::as_u64)
    }
}

/// Outcome of a batched upsert. Partial success is normal operation,
/// not an error.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct UpsertReport {
    /// Records handed to the store.
    pub attempted: usize,
    /// Records acknowledged by the store.
    pub uploaded: usize,
    /// Whole batches the store refused or dropped.
    pub failed_batches: usize,
}

impl UpsertReport {
    /// True when every record landed.
    pub fn is_complete(&self) -> bool {
        self.failed_batches == 0 && self.uploaded == self.attempted
    }

    /// Records that never made it into the index.
    pub fn failed(&self) -> usize {
        self.attempted.saturating_sub(self.uploaded)
    }
}

/// Index-wide statistics as reported by the backend.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexStats {
    pub dimension: usize,
    pub total_vectors: usize,
    pub index_fullness: f32,
    /// Vector count per namespace.
    pub namespaces: BTreeMap<String, usize>,
}

impl IndexStats {
    /// Vector count for one namespace, zero when the namespace is unknown.
    pub fn namespace_count(&self, namespace: &str) -> usize {
        self.namespaces.get(namespace).copied().unwrap_or(0)
    }
}

/// Metadata predicate applied server-side during queries.
///
/// Encodes to the store's filter JSON via [`MetadataFilter::to_query_json`]:
/// `{"field": {"$eq": value}}`, `{"$in": [..]}`, and `{"$and": [..]}`.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataFilter {
    /// Field equals the value exactly.
    Eq(String, Value),
    /// Field matches any of the listed values.
    In(String, Vec<Value>),
    /// Every inner filter must hold.
    And(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In(field.into(), values)
    }

    pub fn and(filters: Vec<MetadataFilter>) -> Self {
        Self::And(filters)
    }

    /// Filter JSON in the data plane's query syntax.
    pub fn to_query_json(&self) -> Value {
        match self {
            Self::Eq(field, value) => {
                serde_json::json!({ field.clone(): { "$eq": value.clone() } })
            }
            Self::In(field, values) => {
                serde_json::json!({ field.clone(): { "$in": values.clone() } })
            }
            Self::And(filters) => {
                let inner: Vec<Value> = filters.iter().map(Self::to_query_json).collect();
                serde_json::json!({ "$and": inner })
            }
        }
    }
}

/// Unified interface to a hosted vector index.
///
/// Implementations own connection details and error mapping; callers see
/// [`PipelineError::StoreUnavailable`] for connectivity problems and
/// [`PipelineError::StoreRejected`] when the service refused a request.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Verifies the index exists and matches the configured dimension,
    /// creating it when missing.
    async fn ensure_index(&self) -> Result<(), PipelineError>;

    /// Uploads records in batches. Failed batches are skipped, surviving
    /// batches still land; the report carries both counts.
    async fn upsert(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<UpsertReport, PipelineError>;

    /// Similarity search, most similar first, at most `top_k` rows.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredMatch>, PipelineError>;

    /// Metadata-only lookup with no meaningful ranking. Sends a zero
    /// vector so the data plane accepts the request.
    async fn query_by_metadata(
        &self,
        namespace: &str,
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, PipelineError>;

    /// Deletes the listed ids from the namespace.
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<(), PipelineError>;

    /// Deletes every vector in the namespace. Safe to call on an empty
    /// or unknown namespace.
    async fn clear_namespace(&self, namespace: &str) -> Result<(), PipelineError>;

    /// Index statistics, optionally narrowed to one namespace.
    async fn stats(&self, namespace: Option<&str>) -> Result<IndexStats, PipelineError>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<(), PipelineError>;
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First `max` characters, unchanged when already short enough.
fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// First `max` characters with a trailing ellipsis when truncated.
fn clamp_chars(text: &str, max: usize) -> String {
    if char_len(text) <= max {
        text.to_string()
    } else {
        let mut clamped = truncate_chars(text, max);
        clamped.push_str("...");
        clamped
    }
}
