//! Client for OpenAI-style hosted embedding endpoints.
//!
//! Sends `{model, input, dimensions}` and reads `{data: [{embedding,
//! index}]}`, re-ordering rows by index so output order always matches
//! input order. Rate limits (429) and server errors retry with exponential
//! backoff; anything else fails the batch and lets the engine degrade to
//! the local fallback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::EmbeddingProvider;
use crate::types::PipelineError;

const DEFAULT_MAX_RETRIES: usize = 3;

pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
}

impl RemoteEmbedder {
    pub fn new(
        api_key: &str,
        endpoint: &str,
        model: &str,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::Config("embedding api key is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        let mut auth_value = HeaderValue::from_str(&auth)
            .map_err(|_| PipelineError::Config("embedding api key is not a valid header value".to_string()))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    #[cfg(test)]
    fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: texts,
                dimensions: self.dimensions,
            };
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = response.json().await.map_err(|err| {
                            PipelineError::Embedding(format!("unreadable embedding response: {err}"))
                        })?;
                        parsed.data.sort_by_key(|row| row.index);
                        if parsed.data.len() != texts.len() {
                            return Err(PipelineError::Embedding(format!(
                                "service returned {} embeddings for {} inputs",
                                parsed.data.len(),
                                texts.len()
                            )));
                        }
                        return Ok(parsed.data.into_iter().map(|row| row.embedding).collect());
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        debug!(%status, attempt, "embedding request throttled, retrying");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(PipelineError::Embedding(format!(
                        "embedding request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        debug!(error = %err, attempt, "embedding transport error, retrying");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn embedder(server: &MockServer) -> RemoteEmbedder {
        RemoteEmbedder::new(
            "sk-test",
            &server.url("/v1/embeddings"),
            "text-embedding-3-small",
            Some(4),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn retry_policy_covers_rate_limits_and_server_errors() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2000));
        assert_eq!(retry_backoff(5), Duration::from_millis(16000));
        assert_eq!(retry_backoff(9), Duration::from_millis(16000));
    }

    #[tokio::test]
    async fn responses_reorder_by_index() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(json!({
                    "data": [
                        {"embedding": [2.0, 2.0, 2.0, 2.0], "index": 1},
                        {"embedding": [1.0, 1.0, 1.0, 1.0], "index": 0}
                    ]
                }));
            })
            .await;

        let embedder = embedder(&server);
        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(vectors[0], vec![1.0, 1.0, 1.0, 1.0]);
        assert_eq!(vectors[1], vec![2.0, 2.0, 2.0, 2.0]);
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(401).body("{\"error\": \"bad key\"}");
            })
            .await;

        let embedder = embedder(&server).with_max_retries(3);
        let err = embedder
            .embed_batch(&["text".to_string()])
            .await
            .unwrap_err();

        assert_eq!(mock.hits_async().await, 1, "401 must not be retried");
        assert!(matches!(err, PipelineError::Embedding(_)));
    }

    #[tokio::test]
    async fn mismatched_row_count_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(json!({"data": [{"embedding": [0.5, 0.5, 0.5, 0.5], "index": 0}]}));
            })
            .await;

        let embedder = embedder(&server);
        let err = embedder
            .embed_batch(&["one".to_string(), "two".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 embeddings for 2 inputs"));
    }
}
