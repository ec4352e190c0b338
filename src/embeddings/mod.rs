//! Embedding generation with a hosted-API-first, local-fallback policy.
//!
//! * [`remote`] — client for an OpenAI-style embeddings endpoint with
//!   rate-limit retries.
//! * [`statistical`] — deterministic bag-of-terms + bigram embedder used
//!   when no API is configured or a remote batch fails.
//!
//! [`EmbeddingEngine`] front-ends both: `embed_documents` never fails, every
//! returned vector has exactly the configured width, and the
//! [`EmbeddingOutcome`] counters tell the caller how the vectors were
//! produced (remote, fallback, degraded, placeholder).

pub mod remote;
pub mod statistical;

use async_trait::async_trait;
use tracing::warn;

use crate::settings::Settings;
use crate::types::{EMBED_BATCH_SIZE, PipelineError};
pub use remote::RemoteEmbedder;
pub use statistical::StatisticalEmbedder;

/// A batch embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short label for logs and health output.
    fn name(&self) -> &str;

    /// Embeds one batch, preserving input order. Implementations may retry
    /// transient failures internally but surface persistent ones.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// How one run of the engine produced its vectors.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingOutcome {
    pub vectors: Vec<Vec<f32>>,
    pub requested: usize,
    pub remote_batches: usize,
    pub fallback_batches: usize,
    /// Batches that fell back because the configured remote failed.
    pub degraded_batches: usize,
    /// Zero vectors emitted for featureless input.
    pub placeholders: usize,
}

impl EmbeddingOutcome {
    /// True when a configured remote could not serve every batch.
    pub fn is_degraded(&self) -> bool {
        self.degraded_batches > 0
    }
}

/// Never-failing embedding facade.
///
/// Prefers the remote provider when one is configured, falls back to the
/// statistical embedder per batch on failure, and pads or truncates every
/// vector to the target width.
pub struct EmbeddingEngine {
    remote: Option<Box<dyn EmbeddingProvider>>,
    fallback: StatisticalEmbedder,
    dimension: usize,
}

impl EmbeddingEngine {
    /// Builds the engine from settings. A usable API key enables the remote
    /// provider; otherwise every batch takes the local path.
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let remote: Option<Box<dyn EmbeddingProvider>> = if settings.has_embed_api() {
            let key = settings.embed_api_key.clone().unwrap_or_default();
            Some(Box::new(RemoteEmbedder::new(
                &key,
                &settings.embed_api_url,
                &settings.embed_model,
                Some(settings.dimension),
                settings.request_timeout,
            )?))
        } else {
            None
        };
        Ok(Self {
            remote,
            fallback: StatisticalEmbedder::new(settings.dimension),
            dimension: settings.dimension,
        })
    }

    /// Local-only engine; used offline and in tests.
    pub fn local_only(dimension: usize) -> Self {
        Self {
            remote: None,
            fallback: StatisticalEmbedder::new(dimension),
            dimension,
        }
    }

    /// Engine with a caller-supplied remote provider.
    pub fn with_provider(provider: Box<dyn EmbeddingProvider>, dimension: usize) -> Self {
        Self {
            remote: Some(provider),
            fallback: StatisticalEmbedder::new(dimension),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn remote_configured(&self) -> bool {
        self.remote.is_some()
    }

    /// Embeds documents in batches. Infallible: remote failures degrade to
    /// the statistical fallback and are reported through the outcome.
    pub async fn embed_documents(&self, texts: &[String]) -> EmbeddingOutcome {
        let mut outcome = EmbeddingOutcome {
            requested: texts.len(),
            ..EmbeddingOutcome::default()
        };

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let vectors = match &self.remote {
                Some(provider) => match provider.embed_batch(batch).await {
                    Ok(vectors) => {
                        outcome.remote_batches += 1;
                        vectors
                    }
                    Err(err) => {
                        warn!(
                            provider = provider.name(),
                            batch = batch.len(),
                            error = %err,
                            "remote embedding failed, using statistical fallback"
                        );
                        outcome.degraded_batches += 1;
                        outcome.fallback_batches += 1;
                        self.fallback.embed_batch_local(batch)
                    }
                },
                None => {
                    outcome.fallback_batches += 1;
                    self.fallback.embed_batch_local(batch)
                }
            };

            for vector in vectors {
                let fitted = fit_dimension(vector, self.dimension);
                if fitted.iter().all(|value| *value == 0.0) {
                    outcome.placeholders += 1;
                }
                outcome.vectors.push(fitted);
            }
        }

        outcome
    }

    /// Embeds a search query through the same path as documents, so query
    /// and document vectors share a space.
    pub async fn embed_query(&self, text: &str) -> Vec<f32> {
        let outcome = self.embed_documents(&[text.to_string()]).await;
        outcome
            .vectors
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![0.0; self.dimension])
    }

    /// Probes the remote provider with a one-word request. `None` when no
    /// remote is configured.
    pub async fn check_remote(&self) -> Option<Result<(), PipelineError>> {
        match &self.remote {
            None => None,
            Some(provider) => Some(
                provider
                    .embed_batch(&["health".to_string()])
                    .await
                    .map(|_| ()),
            ),
        }
    }
}

/// Zero-pads or truncates to exactly `dimension` entries.
fn fit_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() > dimension {
        vector.truncate(dimension);
    } else {
        vector.resize(dimension, 0.0);
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Err(PipelineError::Embedding("simulated outage".to_string()))
        }
    }

    struct ShortVectorProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortVectorProvider {
        fn name(&self) -> &str {
            "short"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
        }
    }

    #[tokio::test]
    async fn remote_failure_degrades_to_fallback_with_full_width() {
        let engine = EmbeddingEngine::with_provider(Box::new(FailingProvider), 64);
        let texts = vec!["rigidbody applies force".to_string(), "terrain paint".to_string()];
        let outcome = engine.embed_documents(&texts).await;

        assert!(outcome.is_degraded());
        assert_eq!(outcome.fallback_batches, 1);
        assert_eq!(outcome.remote_batches, 0);
        assert_eq!(outcome.vectors.len(), 2);
        for vector in &outcome.vectors {
            assert_eq!(vector.len(), 64, "fallback vectors must keep the target width");
        }
    }

    #[tokio::test]
    async fn short_remote_vectors_are_padded() {
        let engine = EmbeddingEngine::with_provider(Box::new(ShortVectorProvider), 8);
        let outcome = engine.embed_documents(&["anything".to_string()]).await;
        assert_eq!(outcome.remote_batches, 1);
        assert_eq!(outcome.vectors[0].len(), 8);
        assert_eq!(outcome.vectors[0][0], 1.0);
        assert_eq!(outcome.vectors[0][2], 0.0, "missing entries pad with zeros");
    }

    #[tokio::test]
    async fn four_word_text_still_fills_the_width() {
        let engine = EmbeddingEngine::local_only(1536);
        let outcome = engine
            .embed_documents(&["only four words here".to_string()])
            .await;
        assert_eq!(outcome.vectors[0].len(), 1536);
        assert!(
            outcome.vectors[0].iter().any(|value| *value != 0.0),
            "real text should produce a non-placeholder vector"
        );
        assert_eq!(outcome.placeholders, 0);
    }

    #[tokio::test]
    async fn empty_text_yields_counted_placeholder() {
        let engine = EmbeddingEngine::local_only(32);
        let outcome = engine.embed_documents(&["   ".to_string()]).await;
        assert_eq!(outcome.placeholders, 1);
        assert_eq!(outcome.vectors[0], vec![0.0; 32]);
    }

    #[tokio::test]
    async fn query_and_document_share_the_vector_space() {
        let engine = EmbeddingEngine::local_only(256);
        let doc_outcome = engine
            .embed_documents(&["rigidbody physics force".to_string()])
            .await;
        let query = engine.embed_query("rigidbody physics force").await;
        let dot: f32 = doc_outcome.vectors[0]
            .iter()
            .zip(&query)
            .map(|(a, b)| a * b)
            .sum();
        assert!(
            dot > 0.9,
            "identical text should embed near-identically, got dot product {dot}"
        );
    }

    #[test]
    fn fit_dimension_truncates_and_pads() {
        assert_eq!(fit_dimension(vec![1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
        assert_eq!(fit_dimension(vec![1.0], 3), vec![1.0, 0.0, 0.0]);
        assert_eq!(fit_dimension(vec![], 2), vec![0.0, 0.0]);
    }
}
