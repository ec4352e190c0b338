use std::env;
use std::time::{Duration, Instant};

use docsmith::pipeline::{DocsPipeline, PopulateOptions, PopulateReport};
use docsmith::settings::Settings;
use docsmith::types::PipelineError;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    init_tracing();

    let settings = Settings::from_env();
    println!("settings: {}", settings.summary());

    let source = env::var("DOCSMITH_SOURCE").unwrap_or_else(|_| "unity_manual".to_string());
    let max_pages = settings.max_pages;
    let clear = env::var("DOCSMITH_CLEAR")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let pipeline = DocsPipeline::from_settings(settings)?;

    println!("→ Checking pipeline health");
    let health = pipeline.health_check().await;
    for (name, component) in &health.components {
        println!("   {:<12} {:?} ({})", name, component.state, component.detail);
    }

    println!("→ Populating from source '{}'", source);
    let options = PopulateOptions::new(source.as_str())
        .with_max_pages(max_pages)
        .with_clear_existing(clear);

    let start = Instant::now();
    let report = pipeline.populate(&options).await;
    let duration = start.elapsed();

    match report {
        PopulateReport::Success {
            docs_scraped,
            chunks_created,
            vectors_uploaded,
            upload_errors,
            index_name,
            namespace,
            message,
            ..
        } => {
            println!("\n✅ Population complete!");
            println!("  pages scraped   : {}", docs_scraped);
            println!("  chunks created  : {}", chunks_created);
            println!("  vectors uploaded: {}", vectors_uploaded);
            println!("  upload errors   : {}", upload_errors);
            println!("  index           : {} ({})", index_name, namespace);
            println!("  duration        : {}", format_duration(duration));
            println!("  {}", message);
        }
        PopulateReport::Error {
            stage,
            message,
            docs_scraped,
            chunks_created,
            ..
        } => {
            eprintln!("\n✗ Population failed during the {} stage", stage);
            eprintln!("  {}", message);
            eprintln!(
                "  progress before failure: {} pages, {} chunks",
                docs_scraped, chunks_created
            );
            std::process::exit(1);
        }
    }

    let stats = pipeline.stats();
    println!(
        "  lifetime totals : {} runs, {} vectors uploaded, {} errors",
        stats.runs, stats.vectors_uploaded, stats.errors
    );

    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_env_filter("info").finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    let minutes = secs / 60;
    let seconds = secs % 60;
    format!("{}m {}.{:03}s", minutes, seconds, millis)
}
