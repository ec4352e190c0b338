//! REST client for a pinecone-style vector data plane.
//!
//! Talks to four endpoints under the configured base url:
//! `/vectors/upsert`, `/query`, `/vectors/delete`, and
//! `/describe_index_stats`, plus `/indexes` when the index has to be
//! created. Connectivity problems and 5xx responses surface as
//! [`PipelineError::StoreUnavailable`]; 4xx responses surface as
//! [`PipelineError::StoreRejected`] with the service's message.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::settings::Settings;
use crate::stores::{
    IndexStats, MetadataFilter, ScoredMatch, UpsertReport, VectorIndex, VectorRecord,
};
use crate::types::{PipelineError, UPSERT_BATCH_SIZE};

const UPSERT_PATH: &str = "/vectors/upsert";
const QUERY_PATH: &str = "/query";
const DELETE_PATH: &str = "/vectors/delete";
const STATS_PATH: &str = "/describe_index_stats";
const CREATE_PATH: &str = "/indexes";

/// Vector index backed by a hosted REST data plane.
#[derive(Debug)]
pub struct RestVectorIndex {
    client: reqwest::Client,
    base_url: String,
    index_name: String,
    dimension: usize,
}

impl RestVectorIndex {
    pub fn new(
        base_url: &str,
        index_name: &str,
        dimension: usize,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(key.trim()).map_err(|_| {
                PipelineError::Config("index api key is not a valid header value".to_string())
            })?;
            // Keeps the key out of Debug output.
            value.set_sensitive(true);
            headers.insert("Api-Key", value);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
            dimension,
        })
    }

    /// Builds the client from settings. The index base url is mandatory.
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let base_url = settings.index_url.as_deref().ok_or_else(|| {
            PipelineError::Config(
                "DOCSMITH_INDEX_URL is not set; the vector index client needs a base url"
                    .to_string(),
            )
        })?;
        Self::new(
            base_url,
            &settings.index_name,
            settings.dimension,
            settings.index_api_key.as_deref(),
            settings.request_timeout,
        )
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, PipelineError> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| PipelineError::StoreUnavailable(format!("vector index unreachable: {err}")))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if status.is_server_error() {
            Err(PipelineError::StoreUnavailable(format!(
                "vector index error ({status}): {body}"
            )))
        } else {
            Err(PipelineError::StoreRejected(format!(
                "vector index refused request ({status}): {body}"
            )))
        }
    }

    async fn create_index(&self) -> Result<(), PipelineError> {
        info!(index = %self.index_name, dimension = self.dimension, "creating vector index");
        let body = json!({
            "name": self.index_name,
            "dimension": self.dimension,
            "metric": "cosine",
        });
        let response = self.post(CREATE_PATH, &body).await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn describe(&self) -> Result<WireStats, PipelineError> {
        let response = Self::check_status(self.post(STATS_PATH, &json!({})).await?).await?;
        read_stats(response).await
    }
}

#[async_trait]
impl VectorIndex for RestVectorIndex {
    async fn ensure_index(&self) -> Result<(), PipelineError> {
        let response = self.post(STATS_PATH, &json!({})).await?;
        if response.status() == StatusCode::NOT_FOUND {
            // A freshly created index carries the configured dimension.
            self.create_index().await?;
            return Ok(());
        }

        let stats = read_stats(Self::check_status(response).await?).await?;
        // Dimension zero means the service did not report one.
        if stats.dimension != 0 && stats.dimension != self.dimension {
            return Err(PipelineError::StoreRejected(format!(
                "index {} reports dimension {}, configured dimension is {}",
                self.index_name, stats.dimension, self.dimension
            )));
        }
        debug!(index = %self.index_name, dimension = self.dimension, "vector index ready");
        Ok(())
    }

    async fn upsert(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<UpsertReport, PipelineError> {
        let mut report = UpsertReport {
            attempted: records.len(),
            ..UpsertReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        for record in &records {
            if record.values.len() != self.dimension {
                return Err(PipelineError::StoreRejected(format!(
                    "record {} has {} values, index dimension is {}",
                    record.id,
                    record.values.len(),
                    self.dimension
                )));
            }
        }

        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let body = json!({ "vectors": batch, "namespace": namespace });
            let outcome = match self.post(UPSERT_PATH, &body).await {
                Ok(response) => Self::check_status(response).await.map(|_| ()),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => report.uploaded += batch.len(),
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(batch = batch.len(), error = %err, "upsert batch failed, continuing");
                }
            }
        }

        debug!(
            attempted = report.attempted,
            uploaded = report.uploaded,
            failed_batches = report.failed_batches,
            "upsert finished"
        );
        Ok(report)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredMatch>, PipelineError> {
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "namespace": namespace,
            "includeMetadata": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter.to_query_json();
        }

        let response = Self::check_status(self.post(QUERY_PATH, &body).await?).await?;
        let parsed: QueryResponse = response.json().await.map_err(|err| {
            PipelineError::StoreUnavailable(format!("unreadable query response: {err}"))
        })?;
        Ok(parsed.matches)
    }

    async fn query_by_metadata(
        &self,
        namespace: &str,
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, PipelineError> {
        // The data plane requires a vector for every query.
        let zero = vec![0.0f32; self.dimension];
        self.query(namespace, &zero, top_k, Some(filter)).await
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<(), PipelineError> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "ids": ids, "namespace": namespace });
        Self::check_status(self.post(DELETE_PATH, &body).await?).await?;
        Ok(())
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<(), PipelineError> {
        let body = json!({ "deleteAll": true, "namespace": namespace });
        Self::check_status(self.post(DELETE_PATH, &body).await?).await?;
        debug!(namespace, "namespace cleared");
        Ok(())
    }

    async fn stats(&self, namespace: Option<&str>) -> Result<IndexStats, PipelineError> {
        let wire = self.describe().await?;
        let mut stats = IndexStats {
            dimension: wire.dimension,
            total_vectors: wire.total_vector_count,
            index_fullness: wire.index_fullness,
            namespaces: wire
                .namespaces
                .into_iter()
                .map(|(name, ns)| (name, ns.vector_count))
                .collect(),
        };
        if let Some(ns) = namespace {
            let count = stats.namespace_count(ns);
            stats.namespaces.retain(|name, _| name == ns);
            stats.total_vectors = count;
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<(), PipelineError> {
        Self::check_status(self.post(STATS_PATH, &json!({})).await?).await?;
        Ok(())
    }
}

async fn read_stats(response: reqwest::Response) -> Result<WireStats, PipelineError> {
    response
        .json()
        .await
        .map_err(|err| PipelineError::StoreUnavailable(format!("unreadable index stats: {err}")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStats {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    total_vector_count: usize,
    #[serde(default)]
    index_fullness: f32,
    #[serde(default)]
    namespaces: BTreeMap<String, WireNamespace>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNamespace {
    #[serde(default)]
    vector_count: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredMatch>,
}
