//! Searches an already-populated documentation index.
//!
//! This example shows how to:
//! - Build a retriever from environment settings
//! - Run a similarity search with an optional category filter
//! - Look up code examples and related concepts for a topic
//!
//! The query comes from the command line; filters come from env vars:
//!
//! ```bash
//! cargo run --example query_docs -- how do I apply force to a rigidbody
//! DOCSMITH_CATEGORY=code_example cargo run --example query_docs -- instantiate a prefab
//! DOCSMITH_API=Rigidbody.AddForce cargo run --example query_docs -- forces
//! ```

use std::env;

use docsmith::pipeline::DocsPipeline;
use docsmith::retriever::{SearchRequest, SearchResponse};
use docsmith::settings::Settings;
use docsmith::types::{ContentCategory, PipelineError};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    init_tracing();

    let settings = Settings::from_env();
    let pipeline = DocsPipeline::from_settings(settings)?;
    let retriever = pipeline.retriever();

    println!("index health: {}", retriever.health_check().await);

    let query: String = env::args().skip(1).collect::<Vec<_>>().join(" ");
    let query = if query.trim().is_empty() {
        "how do I apply force to a rigidbody".to_string()
    } else {
        query
    };
    let category = env::var("DOCSMITH_CATEGORY")
        .ok()
        .and_then(|value| ContentCategory::parse(&value));
    let top_k = env::var("DOCSMITH_TOP_K")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(5);

    let mut request = SearchRequest::new(query.as_str()).with_max_results(top_k);
    if let Some(category) = category {
        println!("→ Searching \"{}\" (category: {})", query, category);
        request = request.with_content_type(category);
    } else {
        println!("→ Searching \"{}\"", query);
    }

    match retriever.search(&request).await {
        SearchResponse::Success {
            results,
            total_results,
            ..
        } => {
            println!("✅ {} results\n", total_results);
            for (position, hit) in results.iter().enumerate() {
                println!(
                    "{}. {} [{}] score {:.3}",
                    position + 1,
                    hit.title,
                    hit.content_type,
                    hit.relevance_score
                );
                println!("   {}", hit.source_url);
                println!("   {}", snippet(&hit.content));
                if hit.has_code_example {
                    println!("   (contains a code example)");
                }
                println!();
            }
        }
        SearchResponse::Error { error, .. } => {
            eprintln!("✗ Search failed: {}", error);
            std::process::exit(1);
        }
    }

    if let Ok(api_name) = env::var("DOCSMITH_API") {
        println!("→ Code examples for '{}'", api_name);
        print_block(retriever.get_code_examples(&api_name, 3).await);
    }

    if let Ok(topic) = env::var("DOCSMITH_TOPIC") {
        println!("→ Concepts related to '{}'", topic);
        print_block(retriever.get_related_concepts(&topic, 5).await);
    }

    Ok(())
}

fn print_block(response: SearchResponse) {
    match response {
        SearchResponse::Success { results, .. } => {
            for hit in &results {
                println!("   {} ({:.3}) {}", hit.title, hit.relevance_score, hit.source_url);
            }
            if results.is_empty() {
                println!("   no matches");
            }
        }
        SearchResponse::Error { error, .. } => println!("   lookup failed: {}", error),
    }
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 160 {
        flat
    } else {
        let cut: String = flat.chars().take(160).collect();
        format!("{}...", cut)
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_env_filter("info").finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
