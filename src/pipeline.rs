//! End-to-end population pipeline.
//!
//! [`DocsPipeline`] wires the stages together: resolve the source
//! configuration, prepare the index, crawl, classify and chunk, embed,
//! and upload. A run never panics its way out; [`DocsPipeline::populate`]
//! always returns a [`PopulateReport`] envelope whose `status` tag is
//! `success` or `error`, with the failing stage named on the error arm.
//!
//! Configuration problems (unknown source key, invalid selectors, bad
//! chunking rules) are caught before the first network request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::embeddings::EmbeddingEngine;
use crate::ingestion::{DocumentChunker, DocumentFetcher};
use crate::retriever::KnowledgeRetriever;
use crate::settings::Settings;
use crate::sources::{ScrapeConfig, SourceConfig};
use crate::stores::{RestVectorIndex, VectorIndex, VectorRecord};
use crate::types::PipelineError;

/// One population run over a single configured source.
#[derive(Clone, Debug)]
pub struct PopulateOptions {
    /// Key into the scrape configuration's source table.
    pub source: String,
    /// Page cap for the crawl. `None` crawls until the frontier is empty;
    /// `Some(0)` is a no-op run that still succeeds.
    pub max_pages: Option<usize>,
    /// Clear the namespace before uploading, for idempotent repopulation.
    pub clear_existing: bool,
    /// Overrides the settings namespace for this run.
    pub namespace: Option<String>,
}

impl PopulateOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            max_pages: None,
            clear_existing: false,
            namespace: None,
        }
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    #[must_use]
    pub fn with_clear_existing(mut self, clear_existing: bool) -> Self {
        self.clear_existing = clear_existing;
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Stage a failed run stopped in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulateStage {
    Config,
    Index,
    Fetch,
    Chunk,
    Embed,
    Upload,
}

impl PopulateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Index => "index",
            Self::Fetch => "fetch",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Upload => "upload",
        }
    }
}

impl fmt::Display for PopulateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged outcome of a population run. `status` is `success` or `error`
/// on the wire; both arms carry the counts reached before the run ended.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PopulateReport {
    Success {
        source: String,
        docs_scraped: usize,
        chunks_created: usize,
        vectors_uploaded: usize,
        /// Records that never landed because their batch failed.
        upload_errors: usize,
        index_name: String,
        namespace: String,
        message: String,
    },
    Error {
        source: String,
        stage: PopulateStage,
        message: String,
        docs_scraped: usize,
        chunks_created: usize,
        vectors_uploaded: usize,
    },
}

impl PopulateReport {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn docs_scraped(&self) -> usize {
        match self {
            Self::Success { docs_scraped, .. } | Self::Error { docs_scraped, .. } => *docs_scraped,
        }
    }

    pub fn chunks_created(&self) -> usize {
        match self {
            Self::Success { chunks_created, .. } | Self::Error { chunks_created, .. } => {
                *chunks_created
            }
        }
    }

    pub fn vectors_uploaded(&self) -> usize {
        match self {
            Self::Success {
                vectors_uploaded, ..
            }
            | Self::Error {
                vectors_uploaded, ..
            } => *vectors_uploaded,
        }
    }
}

/// Component status used by [`DocsPipeline::health_check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Clone, Debug, Serialize)]
pub struct ComponentHealth {
    pub state: HealthState,
    pub detail: String,
}

/// Read-only snapshot of pipeline health.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub overall: HealthState,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Cumulative counters across the pipeline's lifetime.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineStats {
    pub runs: usize,
    pub documents_scraped: usize,
    pub chunks_created: usize,
    pub vectors_uploaded: usize,
    pub errors: usize,
    pub last_run_id: Option<Uuid>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_run_secs: Option<f64>,
}

#[derive(Clone, Copy, Debug, Default)]
struct RunProgress {
    docs_scraped: usize,
    chunks_created: usize,
    vectors_uploaded: usize,
    upload_errors: usize,
}

/// Orchestrates crawl, chunk, embed, and upload for configured sources.
pub struct DocsPipeline {
    settings: Settings,
    config: ScrapeConfig,
    index: Arc<dyn VectorIndex>,
    engine: Arc<EmbeddingEngine>,
    stats: RwLock<PipelineStats>,
}

impl DocsPipeline {
    pub fn new(
        settings: Settings,
        config: ScrapeConfig,
        index: Arc<dyn VectorIndex>,
        engine: Arc<EmbeddingEngine>,
    ) -> Self {
        Self {
            settings,
            config,
            index,
            engine,
            stats: RwLock::new(PipelineStats::default()),
        }
    }

    /// Builds the pipeline from settings: REST vector index, hosted
    /// embeddings when an API key is configured, built-in scrape config.
    pub fn from_settings(settings: Settings) -> Result<Self, PipelineError> {
        let index = Arc::new(RestVectorIndex::from_settings(&settings)?);
        let engine = Arc::new(EmbeddingEngine::from_settings(&settings)?);
        Ok(Self::new(settings, ScrapeConfig::builtin(), index, engine))
    }

    /// Swaps in a different scrape configuration.
    #[must_use]
    pub fn with_config(mut self, config: ScrapeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Search interface sharing this pipeline's index and embedder.
    pub fn retriever(&self) -> KnowledgeRetriever {
        KnowledgeRetriever::new(
            Arc::clone(&self.index),
            Arc::clone(&self.engine),
            self.settings.namespace.clone(),
        )
    }

    /// Snapshot of the cumulative run counters.
    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// Runs the full pipeline for one source.
    #[instrument(skip_all, fields(source = %options.source))]
    pub async fn populate(&self, options: &PopulateOptions) -> PopulateReport {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let namespace = options
            .namespace
            .clone()
            .unwrap_or_else(|| self.settings.namespace.clone());
        info!(run_id = %run_id, namespace = %namespace, "population run starting");

        let mut progress = RunProgress::default();

        // Everything config-derived is checked before the first request.
        let source = match self.resolve_source(&options.source) {
            Ok(source) => source.clone(),
            Err(err) => {
                return self.finish_error(
                    options,
                    &namespace,
                    PopulateStage::Config,
                    err,
                    progress,
                    started,
                    run_id,
                );
            }
        };
        let fetcher = match DocumentFetcher::new(&options.source, &source, &self.settings) {
            Ok(fetcher) => fetcher,
            Err(err) => {
                return self.finish_error(
                    options,
                    &namespace,
                    PopulateStage::Config,
                    err,
                    progress,
                    started,
                    run_id,
                );
            }
        };
        let chunker = match DocumentChunker::new(&self.config) {
            Ok(chunker) => chunker,
            Err(err) => {
                return self.finish_error(
                    options,
                    &namespace,
                    PopulateStage::Chunk,
                    err,
                    progress,
                    started,
                    run_id,
                );
            }
        };

        if let Err(err) = self.index.ensure_index().await {
            return self.finish_error(
                options,
                &namespace,
                PopulateStage::Index,
                err,
                progress,
                started,
                run_id,
            );
        }
        if options.clear_existing {
            if let Err(err) = self.index.clear_namespace(&namespace).await {
                return self.finish_error(
                    options,
                    &namespace,
                    PopulateStage::Index,
                    err,
                    progress,
                    started,
                    run_id,
                );
            }
            info!(namespace = %namespace, "existing vectors cleared");
        }

        let crawl = match fetcher.crawl(options.max_pages).await {
            Ok(outcome) => outcome,
            Err(err) => {
                return self.finish_error(
                    options,
                    &namespace,
                    PopulateStage::Fetch,
                    err,
                    progress,
                    started,
                    run_id,
                );
            }
        };
        progress.docs_scraped = crawl.pages.len();
        if crawl.pages.is_empty() {
            return self.finish_success(
                options,
                &namespace,
                progress,
                started,
                run_id,
                "no pages fetched, nothing to upload".to_string(),
            );
        }

        let chunked = chunker.process(&crawl.pages);
        progress.chunks_created = chunked.chunks.len();
        if chunked.chunks.is_empty() {
            return self.finish_success(
                options,
                &namespace,
                progress,
                started,
                run_id,
                "no chunks passed the minimum length, nothing to upload".to_string(),
            );
        }

        let texts: Vec<String> = chunked
            .chunks
            .iter()
            .map(|chunk| chunk.content.clone())
            .collect();
        let mut embedded = self.engine.embed_documents(&texts).await;

        // The outcome counters are still needed for the report message.
        let records: Vec<VectorRecord> = chunked
            .chunks
            .iter()
            .zip(std::mem::take(&mut embedded.vectors))
            .map(|(chunk, values)| VectorRecord::from_chunk(chunk, values))
            .collect();

        let upsert = match self.index.upsert(&namespace, records).await {
            Ok(report) => report,
            Err(err) => {
                return self.finish_error(
                    options,
                    &namespace,
                    PopulateStage::Upload,
                    err,
                    progress,
                    started,
                    run_id,
                );
            }
        };
        progress.vectors_uploaded = upsert.uploaded;
        progress.upload_errors = upsert.failed();

        let mut message = format!(
            "scraped {} pages into {} chunks, uploaded {} vectors",
            progress.docs_scraped, progress.chunks_created, progress.vectors_uploaded
        );
        if embedded.is_degraded() {
            message.push_str(&format!(
                "; {} embedding batches fell back to the statistical embedder",
                embedded.degraded_batches
            ));
        }
        if !upsert.is_complete() {
            message.push_str(&format!("; {} upload batches failed", upsert.failed_batches));
        }
        self.finish_success(options, &namespace, progress, started, run_id, message)
    }

    /// Probes the vector index and the embedding provider without
    /// writing anything.
    pub async fn health_check(&self) -> HealthReport {
        let mut components = BTreeMap::new();

        let index_health = match self.index.stats(None).await {
            Ok(stats) => ComponentHealth {
                state: HealthState::Healthy,
                detail: format!(
                    "{} vectors across {} namespaces",
                    stats.total_vectors,
                    stats.namespaces.len()
                ),
            },
            Err(err) if err.is_connectivity() => ComponentHealth {
                state: HealthState::Unhealthy,
                detail: err.to_string(),
            },
            Err(err) => ComponentHealth {
                state: HealthState::Degraded,
                detail: err.to_string(),
            },
        };
        components.insert("vector_index".to_string(), index_health);

        let embed_health = match self.engine.check_remote().await {
            Some(Ok(())) => ComponentHealth {
                state: HealthState::Healthy,
                detail: "hosted embedding provider reachable".to_string(),
            },
            Some(Err(err)) => ComponentHealth {
                state: HealthState::Degraded,
                detail: format!("hosted provider failing, statistical fallback active: {err}"),
            },
            None => ComponentHealth {
                state: HealthState::Degraded,
                detail: "no hosted embedding provider configured, statistical fallback active"
                    .to_string(),
            },
        };
        components.insert("embeddings".to_string(), embed_health);

        let overall = if components
            .values()
            .any(|component| component.state == HealthState::Unhealthy)
        {
            HealthState::Unhealthy
        } else if components
            .values()
            .any(|component| component.state == HealthState::Degraded)
        {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthReport { overall, components }
    }

    fn resolve_source(&self, key: &str) -> Result<&SourceConfig, PipelineError> {
        self.config.validate()?;
        self.config.source(key)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_error(
        &self,
        options: &PopulateOptions,
        namespace: &str,
        stage: PopulateStage,
        err: PipelineError,
        progress: RunProgress,
        started: Instant,
        run_id: Uuid,
    ) -> PopulateReport {
        self.record_run(&progress, run_id, started, false);
        warn!(run_id = %run_id, %stage, namespace = %namespace, error = %err, "population run failed");
        PopulateReport::Error {
            source: options.source.clone(),
            stage,
            message: err.to_string(),
            docs_scraped: progress.docs_scraped,
            chunks_created: progress.chunks_created,
            vectors_uploaded: progress.vectors_uploaded,
        }
    }

    fn finish_success(
        &self,
        options: &PopulateOptions,
        namespace: &str,
        progress: RunProgress,
        started: Instant,
        run_id: Uuid,
        message: String,
    ) -> PopulateReport {
        self.record_run(&progress, run_id, started, true);
        info!(
            run_id = %run_id,
            docs = progress.docs_scraped,
            chunks = progress.chunks_created,
            vectors = progress.vectors_uploaded,
            "population run finished"
        );
        PopulateReport::Success {
            source: options.source.clone(),
            docs_scraped: progress.docs_scraped,
            chunks_created: progress.chunks_created,
            vectors_uploaded: progress.vectors_uploaded,
            upload_errors: progress.upload_errors,
            index_name: self.settings.index_name.clone(),
            namespace: namespace.to_string(),
            message,
        }
    }

    fn record_run(&self, progress: &RunProgress, run_id: Uuid, started: Instant, success: bool) {
        let mut stats = self.stats.write();
        stats.runs += 1;
        stats.documents_scraped += progress.docs_scraped;
        stats.chunks_created += progress.chunks_created;
        stats.vectors_uploaded += progress.vectors_uploaded;
        if !success {
            stats.errors += 1;
        }
        stats.last_run_id = Some(run_id);
        stats.last_run = Some(Utc::now());
        stats.last_run_secs = Some(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{IndexStats, MetadataFilter, ScoredMatch, UpsertReport};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records which trait methods ran, in order.
    #[derive(Default)]
    struct RecordingIndex {
        calls: Mutex<Vec<&'static str>>,
        fail_stats: bool,
    }

    impl RecordingIndex {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn ensure_index(&self) -> Result<(), PipelineError> {
            self.calls.lock().push("ensure_index");
            Ok(())
        }

        async fn upsert(
            &self,
            _namespace: &str,
            records: Vec<VectorRecord>,
        ) -> Result<UpsertReport, PipelineError> {
            self.calls.lock().push("upsert");
            Ok(UpsertReport {
                attempted: records.len(),
                uploaded: records.len(),
                failed_batches: 0,
            })
        }

        async fn query(
            &self,
            _namespace: &str,
            _vector: &[f32],
            _top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<ScoredMatch>, PipelineError> {
            self.calls.lock().push("query");
            Ok(Vec::new())
        }

        async fn query_by_metadata(
            &self,
            namespace: &str,
            filter: &MetadataFilter,
            top_k: usize,
        ) -> Result<Vec<ScoredMatch>, PipelineError> {
            self.query(namespace, &[], top_k, Some(filter)).await
        }

        async fn delete(&self, _namespace: &str, _ids: &[String]) -> Result<(), PipelineError> {
            self.calls.lock().push("delete");
            Ok(())
        }

        async fn clear_namespace(&self, _namespace: &str) -> Result<(), PipelineError> {
            self.calls.lock().push("clear_namespace");
            Ok(())
        }

        async fn stats(&self, _namespace: Option<&str>) -> Result<IndexStats, PipelineError> {
            self.calls.lock().push("stats");
            if self.fail_stats {
                return Err(PipelineError::StoreUnavailable("index offline".to_string()));
            }
            Ok(IndexStats {
                dimension: 8,
                ..IndexStats::default()
            })
        }

        async fn health_check(&self) -> Result<(), PipelineError> {
            self.calls.lock().push("health_check");
            Ok(())
        }
    }

    fn pipeline_with(index: Arc<RecordingIndex>) -> DocsPipeline {
        let settings = Settings {
            dimension: 8,
            namespace: "test".to_string(),
            ..Settings::default()
        };
        DocsPipeline::new(
            settings,
            ScrapeConfig::builtin(),
            index,
            Arc::new(EmbeddingEngine::local_only(8)),
        )
    }

    #[tokio::test]
    async fn unknown_source_fails_in_the_config_stage_without_network() {
        let index = Arc::new(RecordingIndex::default());
        let pipeline = pipeline_with(Arc::clone(&index));

        let report = pipeline
            .populate(&PopulateOptions::new("not_a_source"))
            .await;

        match report {
            PopulateReport::Error { stage, message, .. } => {
                assert_eq!(stage, PopulateStage::Config);
                assert!(message.contains("not_a_source"));
            }
            PopulateReport::Success { .. } => panic!("unknown source must not succeed"),
        }
        assert!(index.calls().is_empty(), "no index call may happen");
        assert_eq!(pipeline.stats().errors, 1);
    }

    #[tokio::test]
    async fn zero_page_cap_is_an_empty_success() {
        let index = Arc::new(RecordingIndex::default());
        let pipeline = pipeline_with(Arc::clone(&index));

        let options = PopulateOptions::new("unity_manual")
            .with_max_pages(0)
            .with_clear_existing(true);
        let report = pipeline.populate(&options).await;

        assert!(report.is_success(), "got {report:?}");
        assert_eq!(report.docs_scraped(), 0);
        assert_eq!(report.chunks_created(), 0);
        assert_eq!(report.vectors_uploaded(), 0);
        assert_eq!(index.calls(), vec!["ensure_index", "clear_namespace"]);

        let stats = pipeline.stats();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.errors, 0);
        assert!(stats.last_run_id.is_some());
        assert!(stats.last_run.is_some());
    }

    #[tokio::test]
    async fn health_rollup_reports_the_worst_component() {
        let offline = Arc::new(RecordingIndex {
            fail_stats: true,
            ..RecordingIndex::default()
        });
        let report = pipeline_with(offline).health_check().await;
        assert_eq!(report.overall, HealthState::Unhealthy);
        assert_eq!(
            report.components["vector_index"].state,
            HealthState::Unhealthy
        );

        let online = Arc::new(RecordingIndex::default());
        let report = pipeline_with(online).health_check().await;
        // Local-only embeddings keep the rollup at degraded.
        assert_eq!(report.overall, HealthState::Degraded);
        assert_eq!(report.components["vector_index"].state, HealthState::Healthy);
        assert_eq!(report.components["embeddings"].state, HealthState::Degraded);
    }
}
