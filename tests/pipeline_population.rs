//! End-to-end population and retrieval against mock services.
//!
//! A mock documentation site serves the pages, a mock data plane accepts
//! the vectors, and embeddings run through the statistical fallback, so
//! the whole pipeline executes without leaving the test process.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use docsmith::Settings;
use docsmith::embeddings::{EmbeddingEngine, RemoteEmbedder};
use docsmith::pipeline::{DocsPipeline, HealthState, PopulateOptions, PopulateReport, PopulateStage};
use docsmith::retriever::SearchRequest;
use docsmith::sources::{CategoryRule, ChunkStrategy, ScrapeConfig, SourceConfig};
use docsmith::stores::RestVectorIndex;
use docsmith::types::ContentCategory;
use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::json;

const DIMENSION: usize = 8;

fn doc_page(title: &str, paragraphs: &[String], links: &[&str]) -> String {
    let nav: String = links
        .iter()
        .map(|href| format!("<a href=\"{href}\">{href}</a>"))
        .collect();
    let body: String = paragraphs
        .iter()
        .map(|text| format!("<p>{text}</p>"))
        .collect();
    format!(
        "<html><head><title>{title}</title></head>\
         <body><nav>{nav}</nav><main>{body}</main></body></html>"
    )
}

fn long_paragraph(topic: &str) -> String {
    format!(
        "{topic} is described at length here so the extractor keeps the page. \
         The section explains the workflow end to end and repeats enough \
         detail to clear the minimum content threshold comfortably."
    )
}

/// Serves index, install (tutorial), and physics (guide) pages plus a
/// 404 and an excluded admin page. Returns the admin mock so tests can
/// prove it was never requested.
fn mount_site(server: &MockServer) -> Mock<'_> {
    let index_html = doc_page(
        "Manual Index",
        &[long_paragraph("The manual index")],
        &[
            "/docs/install.html",
            "/docs/physics.html",
            "/docs/missing.html",
            "/admin/secret.html",
        ],
    );
    let install_html = doc_page(
        "Install Tutorial",
        &[
            long_paragraph("Step 1: installing the editor"),
            long_paragraph("Step 2: configuring a project"),
        ],
        &[],
    );
    let physics_html = doc_page(
        "Physics Guide",
        &[
            long_paragraph("Rigidbody motion"),
            long_paragraph("Collision layers"),
        ],
        &[],
    );

    server.mock(|when, then| {
        when.method(GET).path("/docs/index.html");
        then.status(200)
            .header("content-type", "text/html")
            .body(index_html);
    });
    server.mock(|when, then| {
        when.method(GET).path("/docs/install.html");
        then.status(200)
            .header("content-type", "text/html")
            .body(install_html);
    });
    server.mock(|when, then| {
        when.method(GET).path("/docs/physics.html");
        then.status(200)
            .header("content-type", "text/html")
            .body(physics_html);
    });
    server.mock(|when, then| {
        when.method(GET).path("/docs/missing.html");
        then.status(404).body("not found");
    });
    server.mock(|when, then| {
        when.method(GET).path("/admin/secret.html");
        then.status(200).body("must never be fetched");
    })
}

struct StoreMocks<'a> {
    stats: Mock<'a>,
    delete: Mock<'a>,
    upsert: Mock<'a>,
}

fn mount_store(store: &MockServer) -> StoreMocks<'_> {
    let stats = store.mock(|when, then| {
        when.method(POST).path("/describe_index_stats");
        then.status(200).json_body(json!({
            "dimension": DIMENSION,
            "totalVectorCount": 0,
            "indexFullness": 0.0,
            "namespaces": {}
        }));
    });
    let delete = store.mock(|when, then| {
        when.method(POST).path("/vectors/delete");
        then.status(200).json_body(json!({}));
    });
    let upsert = store.mock(|when, then| {
        when.method(POST).path("/vectors/upsert");
        then.status(200).json_body(json!({ "upsertedCount": 100 }));
    });
    StoreMocks { stats, delete, upsert }
}

fn scrape_config(site: &MockServer) -> ScrapeConfig {
    let source: SourceConfig = serde_json::from_value(json!({
        "name": "Mock Manual",
        "base_urls": [site.url("/docs/index.html")],
        "discovery_patterns": ["/docs/"],
        "exclude_patterns": ["/admin/"],
        "delay_seconds": 0.0,
        "max_concurrent": 4,
    }))
    .expect("source config");

    let mut sources = BTreeMap::new();
    sources.insert("mock_manual".to_string(), source);

    ScrapeConfig {
        sources,
        content_classification: vec![
            CategoryRule {
                category: ContentCategory::Tutorial,
                indicators: vec!["step".to_string(), "tutorial".to_string()],
                strategy: ChunkStrategy::SequentialSteps,
                chunk_size: 600,
                overlap: 100,
            },
            CategoryRule {
                category: ContentCategory::Guide,
                indicators: vec!["guide".to_string()],
                strategy: ChunkStrategy::TopicBased,
                chunk_size: 600,
                overlap: 100,
            },
        ],
    }
}

fn test_settings(store: &MockServer) -> Settings {
    Settings {
        dimension: DIMENSION,
        namespace: "it".to_string(),
        index_url: Some(store.base_url()),
        index_name: "docs-it".to_string(),
        request_timeout: Duration::from_secs(5),
        ..Settings::default()
    }
}

fn pipeline(site: &MockServer, store: &MockServer) -> DocsPipeline {
    let settings = test_settings(store);
    let index = RestVectorIndex::from_settings(&settings).expect("index client");
    DocsPipeline::new(
        settings,
        scrape_config(site),
        Arc::new(index),
        Arc::new(EmbeddingEngine::local_only(DIMENSION)),
    )
}

#[tokio::test]
async fn populate_scrapes_chunks_and_uploads() {
    let site = MockServer::start_async().await;
    let store = MockServer::start_async().await;
    let admin = mount_site(&site);
    let mocks = mount_store(&store);
    let pipeline = pipeline(&site, &store);

    let report = pipeline
        .populate(&PopulateOptions::new("mock_manual").with_max_pages(10))
        .await;

    match &report {
        PopulateReport::Success {
            docs_scraped,
            chunks_created,
            vectors_uploaded,
            upload_errors,
            namespace,
            ..
        } => {
            assert_eq!(*docs_scraped, 3, "index page plus two linked pages");
            assert_eq!(*chunks_created, 3, "one chunk per mock page");
            assert_eq!(vectors_uploaded, chunks_created);
            assert_eq!(*upload_errors, 0);
            assert_eq!(namespace, "it");
        }
        PopulateReport::Error { stage, message, .. } => {
            panic!("populate failed in {stage}: {message}")
        }
    }

    assert_eq!(admin.hits_async().await, 0, "excluded urls are never fetched");
    assert_eq!(mocks.upsert.hits_async().await, 1, "3 records fit one batch");
    assert_eq!(mocks.delete.hits_async().await, 0, "no clear was requested");

    let stats = pipeline.stats();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.documents_scraped, 3);
    assert_eq!(stats.vectors_uploaded, 3);
    assert!(stats.last_run_id.is_some());
}

#[tokio::test]
async fn repopulating_with_clear_is_idempotent() {
    let site = MockServer::start_async().await;
    let store = MockServer::start_async().await;
    mount_site(&site);
    let mocks = mount_store(&store);
    let pipeline = pipeline(&site, &store);

    let options = PopulateOptions::new("mock_manual")
        .with_max_pages(10)
        .with_clear_existing(true);
    let first = pipeline.populate(&options).await;
    let second = pipeline.populate(&options).await;

    assert!(first.is_success(), "first run: {first:?}");
    assert!(second.is_success(), "second run: {second:?}");
    assert_eq!(first.chunks_created(), second.chunks_created());
    assert_eq!(first.vectors_uploaded(), second.vectors_uploaded());
    assert_eq!(
        mocks.delete.hits_async().await,
        2,
        "each run clears the namespace before uploading"
    );
    assert_eq!(pipeline.stats().runs, 2);
    assert_eq!(pipeline.stats().errors, 0);
}

#[tokio::test]
async fn search_applies_the_category_filter() {
    let site = MockServer::start_async().await;
    let store = MockServer::start_async().await;
    mount_site(&site);
    mount_store(&store);
    let query = store.mock(|when, then| {
        when.method(POST)
            .path("/query")
            .json_body_partial(r#"{ "filter": { "content_type": { "$eq": "tutorial" } } }"#);
        then.status(200).json_body(json!({ "matches": [{
            "id": "t_0",
            "score": 0.91,
            "metadata": {
                "title": "Install Tutorial",
                "content_type": "tutorial",
                "text_content": "Step 1: installing the editor",
                "source_url": "/docs/install.html",
                "source": "mock_manual",
                "has_code": false,
                "chunk_index": 0,
                "total_chunks": 2
            }
        }]}));
    });

    let retriever = pipeline(&site, &store).retriever();
    let response = retriever
        .search(
            &SearchRequest::new("how do I install the editor")
                .with_content_type(ContentCategory::Tutorial),
        )
        .await;

    query.assert_async().await;
    assert!(response.is_success());
    let hits = response.results();
    assert_eq!(hits.len(), 1);
    assert!(
        hits.iter().all(|hit| hit.content_type == "tutorial"),
        "only the filtered category may come back"
    );
    assert_eq!(hits[0].relevance_score, 0.91);
    assert_eq!(hits[0].chunk_info.total_chunks, 2);
}

#[tokio::test]
async fn mismatched_embedding_width_fails_the_upload_stage() {
    let site = MockServer::start_async().await;
    let store = MockServer::start_async().await;
    mount_site(&site);
    let mocks = mount_store(&store);

    let settings = test_settings(&store);
    let index = RestVectorIndex::from_settings(&settings).expect("index client");
    // Engine width disagrees with the configured index dimension.
    let pipeline = DocsPipeline::new(
        settings,
        scrape_config(&site),
        Arc::new(index),
        Arc::new(EmbeddingEngine::local_only(16)),
    );

    let report = pipeline
        .populate(&PopulateOptions::new("mock_manual").with_max_pages(10))
        .await;

    match report {
        PopulateReport::Error { stage, message, .. } => {
            assert_eq!(stage, PopulateStage::Upload);
            assert!(message.contains("dimension"), "got: {message}");
        }
        PopulateReport::Success { .. } => panic!("width mismatch must not succeed"),
    }
    assert_eq!(
        mocks.upsert.hits_async().await,
        0,
        "validation runs before any upload request"
    );
}

#[tokio::test]
async fn degraded_embeddings_still_upload_and_are_reported() {
    let site = MockServer::start_async().await;
    let store = MockServer::start_async().await;
    let embeddings = MockServer::start_async().await;
    mount_site(&site);
    let mocks = mount_store(&store);
    let embed_mock = embeddings.mock(|when, then| {
        when.method(POST).path("/v1/embeddings");
        then.status(400)
            .header("content-type", "application/json")
            .body(r#"{"error": {"message": "model overloaded"}}"#);
    });

    let settings = test_settings(&store);
    let index = RestVectorIndex::from_settings(&settings).expect("index client");
    let remote = RemoteEmbedder::new(
        "sk-test",
        &embeddings.url("/v1/embeddings"),
        "text-embedding-3-small",
        Some(DIMENSION),
        Duration::from_secs(5),
    )
    .expect("remote embedder");
    let pipeline = DocsPipeline::new(
        settings,
        scrape_config(&site),
        Arc::new(index),
        Arc::new(EmbeddingEngine::with_provider(Box::new(remote), DIMENSION)),
    );

    let report = pipeline
        .populate(&PopulateOptions::new("mock_manual").with_max_pages(10))
        .await;

    match &report {
        PopulateReport::Success {
            chunks_created,
            vectors_uploaded,
            message,
            ..
        } => {
            assert_eq!(
                vectors_uploaded, chunks_created,
                "fallback vectors upload like remote ones"
            );
            assert!(
                message.contains("fell back to the statistical embedder"),
                "got: {message}"
            );
        }
        PopulateReport::Error { stage, message, .. } => {
            panic!("a degraded batch must not fail the run ({stage}: {message})")
        }
    }
    assert_eq!(
        embed_mock.hits_async().await,
        1,
        "client errors are not retried"
    );
    assert_eq!(mocks.upsert.hits_async().await, 1);
}

#[tokio::test]
async fn health_check_probes_without_writing() {
    let site = MockServer::start_async().await;
    let store = MockServer::start_async().await;
    let mocks = mount_store(&store);

    let report = pipeline(&site, &store).health_check().await;

    assert_eq!(report.components["vector_index"].state, HealthState::Healthy);
    // Local-only embeddings keep the rollup at degraded.
    assert_eq!(report.components["embeddings"].state, HealthState::Degraded);
    assert_eq!(report.overall, HealthState::Degraded);
    assert!(mocks.stats.hits_async().await >= 1);
    assert_eq!(mocks.upsert.hits_async().await, 0, "health checks never write");
    assert_eq!(mocks.delete.hits_async().await, 0, "health checks never delete");
}
