//! Read-side search API over the vector index.
//!
//! The retriever is the surface handed to agent tools, so nothing here
//! returns `Err` across the boundary: every operation produces a tagged
//! envelope ([`SearchResponse`]) whose `status` field is `success` or
//! `error`. Callers branch on the tag instead of catching failures.
//!
//! - [`KnowledgeRetriever::search`] - semantic search with optional
//!   content-type and source filters
//! - [`KnowledgeRetriever::search_by_category`] - filtered search that
//!   retries unfiltered when the category has no hits
//! - [`KnowledgeRetriever::get_code_examples`] - code-bearing chunks
//!   mentioning an API name
//! - [`KnowledgeRetriever::get_related_concepts`] - conceptual material
//!   (guides, tutorials, reference) around a topic
//! - [`KnowledgeRetriever::get_contextual_docs`] - audience-tuned search
//!   (query decorated with expertise descriptors)
//! - [`KnowledgeRetriever::health_check`] - index reachability as JSON

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::embeddings::EmbeddingEngine;
use crate::stores::{MetadataFilter, ScoredMatch, VectorIndex};
use crate::types::ContentCategory;

/// Result previews are cut at this many characters.
const PREVIEW_MAX_CHARS: usize = 500;
/// Results returned when the caller does not say otherwise.
pub const DEFAULT_MAX_RESULTS: usize = 5;
/// Default cap for [`KnowledgeRetriever::get_code_examples`].
pub const DEFAULT_CODE_EXAMPLES: usize = 3;
/// Default cap for [`KnowledgeRetriever::get_related_concepts`].
pub const DEFAULT_RELATED_CONCEPTS: usize = 5;
/// Default cap for [`KnowledgeRetriever::get_contextual_docs`].
pub const DEFAULT_CONTEXTUAL_DOCS: usize = 5;

/// One semantic search call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Restrict results to one content category.
    #[serde(default)]
    pub content_type: Option<ContentCategory>,
    /// Restrict results to one configured source.
    #[serde(default)]
    pub source: Option<String>,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: DEFAULT_MAX_RESULTS,
            content_type: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentCategory) -> Self {
        self.content_type = Some(content_type);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Position of a chunk within its source page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// One formatted search result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    /// Chunk text cut to [`PREVIEW_MAX_CHARS`] characters.
    pub content: String,
    pub source_url: String,
    pub title: String,
    /// Similarity score rounded to three decimals.
    pub relevance_score: f64,
    pub content_type: String,
    pub has_code_example: bool,
    pub source: String,
    pub chunk_info: ChunkPosition,
}

impl SearchHit {
    fn from_match(scored: &ScoredMatch) -> Self {
        Self {
            content: preview(scored.metadata_str("text_content")),
            source_url: scored.metadata_str("source_url").to_string(),
            title: scored.metadata_str("title").to_string(),
            relevance_score: round3(scored.score),
            content_type: scored.metadata_str("content_type").to_string(),
            has_code_example: scored
                .metadata
                .get("has_code")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            source: scored.metadata_str("source").to_string(),
            chunk_info: ChunkPosition {
                chunk_index: scored.metadata_u64("chunk_index").unwrap_or(0) as usize,
                total_chunks: scored.metadata_u64("total_chunks").unwrap_or(0) as usize,
            },
        }
    }
}

/// Tagged search envelope. `status` is `success` or `error` on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchResponse {
    Success {
        query: String,
        results: Vec<SearchHit>,
        total_results: usize,
        /// Filters that were in effect, echoed for the caller.
        filters_applied: Value,
    },
    Error {
        query: String,
        results: Vec<SearchHit>,
        total_results: usize,
        error: String,
    },
}

impl SearchResponse {
    fn success(query: &str, results: Vec<SearchHit>, filters_applied: Value) -> Self {
        Self::Success {
            query: query.to_string(),
            total_results: results.len(),
            results,
            filters_applied,
        }
    }

    fn error(query: &str, message: impl Into<String>) -> Self {
        Self::Error {
            query: query.to_string(),
            results: Vec::new(),
            total_results: 0,
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn results(&self) -> &[SearchHit] {
        match self {
            Self::Success { results, .. } | Self::Error { results, .. } => results,
        }
    }
}

/// Search over an already-populated index.
pub struct KnowledgeRetriever {
    index: Arc<dyn VectorIndex>,
    engine: Arc<EmbeddingEngine>,
    namespace: String,
}

impl KnowledgeRetriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        engine: Arc<EmbeddingEngine>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            index,
            engine,
            namespace: namespace.into(),
        }
    }

    /// Semantic search with optional filters.
    pub async fn search(&self, request: &SearchRequest) -> SearchResponse {
        let query = request.query.trim();
        if query.is_empty() {
            return SearchResponse::error(&request.query, "query text is empty");
        }

        let vector = self.engine.embed_query(query).await;
        let filter = build_filter(request);
        let filters_applied = json!({
            "content_type": request.content_type.map(|category| category.as_str()),
            "source": request.source.clone(),
        });

        match self
            .index
            .query(&self.namespace, &vector, request.max_results, filter.as_ref())
            .await
        {
            Ok(matches) => {
                let results: Vec<SearchHit> = matches.iter().map(SearchHit::from_match).collect();
                debug!(query, results = results.len(), "search complete");
                SearchResponse::success(&request.query, results, filters_applied)
            }
            Err(err) => {
                warn!(query, error = %err, "search failed");
                SearchResponse::error(&request.query, err.to_string())
            }
        }
    }

    /// Category-restricted search. When the category yields nothing the
    /// search runs again without the filter, so a miscategorized corpus
    /// still answers.
    pub async fn search_by_category(
        &self,
        query: &str,
        category: ContentCategory,
        max_results: usize,
    ) -> SearchResponse {
        let request = SearchRequest::new(query)
            .with_content_type(category)
            .with_max_results(max_results);
        let response = self.search(&request).await;

        if let SearchResponse::Success { results, .. } = &response {
            if results.is_empty() {
                debug!(category = category.as_str(), "no category hits, retrying unfiltered");
                let unfiltered = SearchRequest::new(query).with_max_results(max_results);
                return self.search(&unfiltered).await;
            }
        }
        response
    }

    /// Code-bearing chunks that mention `api_name` in their title or url.
    ///
    /// Over-fetches double the requested amount before the name filter,
    /// since the similarity ranking alone often surfaces neighbours of
    /// the requested API rather than the API itself.
    pub async fn get_code_examples(&self, api_name: &str, max_examples: usize) -> SearchResponse {
        let needle = api_name.trim();
        if needle.is_empty() {
            return SearchResponse::error(api_name, "api name is empty");
        }
        let query = format!("{needle} code example usage");
        let vector = self.engine.embed_query(&query).await;
        let filter = MetadataFilter::eq("has_code", true);

        match self
            .index
            .query(&self.namespace, &vector, max_examples * 2, Some(&filter))
            .await
        {
            Ok(matches) => {
                let lowered = needle.to_lowercase();
                let mut results = Vec::new();
                for scored in &matches {
                    let title = scored.metadata_str("title").to_lowercase();
                    let url = scored.metadata_str("source_url").to_lowercase();
                    if title.contains(&lowered) || url.contains(&lowered) {
                        results.push(SearchHit::from_match(scored));
                        if results.len() == max_examples {
                            break;
                        }
                    }
                }
                SearchResponse::success(
                    &query,
                    results,
                    json!({ "has_code": true, "api_name": needle }),
                )
            }
            Err(err) => SearchResponse::error(&query, err.to_string()),
        }
    }

    /// Conceptual material around a topic: guides, tutorials, and
    /// reference pages.
    pub async fn get_related_concepts(&self, topic: &str, max_results: usize) -> SearchResponse {
        if topic.trim().is_empty() {
            return SearchResponse::error(topic, "topic is empty");
        }
        let vector = self.engine.embed_query(topic).await;
        let categories = vec![
            Value::from(ContentCategory::Guide.as_str()),
            Value::from(ContentCategory::Tutorial.as_str()),
            Value::from(ContentCategory::ApiReference.as_str()),
        ];
        let filter = MetadataFilter::is_in("content_type", categories.clone());

        match self
            .index
            .query(&self.namespace, &vector, max_results, Some(&filter))
            .await
        {
            Ok(matches) => {
                let results: Vec<SearchHit> = matches.iter().map(SearchHit::from_match).collect();
                SearchResponse::success(topic, results, json!({ "content_type": { "$in": categories } }))
            }
            Err(err) => SearchResponse::error(topic, err.to_string()),
        }
    }

    /// Search tuned to a reader's expertise. Recognized audiences
    /// (`beginner`, `advanced`, `programmer`, `artist`, `designer`)
    /// decorate the query with descriptor terms before embedding, steering
    /// similarity toward material written for that reader; anything else
    /// searches the query as given. No category filter, so every content
    /// type can answer.
    pub async fn get_contextual_docs(
        &self,
        query: &str,
        audience: &str,
        max_results: usize,
    ) -> SearchResponse {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return SearchResponse::error(query, "query text is empty");
        }
        let decorated = decorate_for_audience(trimmed, audience);
        let vector = self.engine.embed_query(&decorated).await;

        match self
            .index
            .query(&self.namespace, &vector, max_results, None)
            .await
        {
            Ok(matches) => {
                let results: Vec<SearchHit> = matches.iter().map(SearchHit::from_match).collect();
                debug!(audience, results = results.len(), "contextual search complete");
                SearchResponse::success(query, results, json!({ "audience": audience }))
            }
            Err(err) => SearchResponse::error(query, err.to_string()),
        }
    }

    /// Index reachability and namespace size, as an envelope-style JSON
    /// object.
    pub async fn health_check(&self) -> Value {
        match self.index.stats(Some(&self.namespace)).await {
            Ok(stats) => json!({
                "status": "healthy",
                "namespace": self.namespace,
                "vectors": stats.namespace_count(&self.namespace),
                "dimension": stats.dimension,
            }),
            Err(err) => json!({
                "status": "unhealthy",
                "namespace": self.namespace,
                "error": err.to_string(),
            }),
        }
    }
}

/// Appends audience-specific descriptor terms so the embedding leans
/// toward material written for that reader. Unknown audiences pass the
/// query through untouched.
fn decorate_for_audience(query: &str, audience: &str) -> String {
    match audience.to_lowercase().as_str() {
        "beginner" => format!("{query} getting started tutorial basics"),
        "advanced" => format!("{query} advanced techniques optimization"),
        "programmer" => format!("{query} scripting code API"),
        "artist" => format!("{query} visual art graphics rendering"),
        "designer" => format!("{query} game design workflow UI UX"),
        _ => query.to_string(),
    }
}

fn build_filter(request: &SearchRequest) -> Option<MetadataFilter> {
    let mut clauses = Vec::new();
    if let Some(category) = request.content_type {
        clauses.push(MetadataFilter::eq("content_type", category.as_str()));
    }
    if let Some(source) = &request.source {
        clauses.push(MetadataFilter::eq("source", source.as_str()));
    }
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(MetadataFilter::and(clauses)),
    }
}

fn round3(score: f32) -> f64 {
    (f64::from(score) * 1000.0).round() / 1000.0
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
        cut.push_str("...");
        cut
    }
}
