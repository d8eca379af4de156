use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod corpus;
mod discovery;
mod embeddings;
mod error;
mod generation;
mod index;
mod metrics;
mod pipeline;
mod retriever;
mod server;
mod validator;

use config::Config;
use corpus::Corpus;
use discovery::{OllamaModelLister, RetryPolicy};
use embeddings::OllamaEmbedder;
use generation::OllamaGenerator;
use index::IndexManager;
use metrics::MetricsCollector;
use pipeline::QueryPipeline;
use retriever::Retriever;
use server::ServiceContext;
use validator::QueryValidator;

fn get_log_dir() -> String {
    std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string())
}

fn get_log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

fn setup_logging() -> Result<()> {
    let log_dir = get_log_dir();
    let log_level = get_log_level();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let is_development = std::env::var("DEVELOPMENT").is_ok() || std::env::var("DEV").is_ok();
    let force_console = std::env::var("CONSOLE_LOGS").is_ok();

    if is_development || force_console {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .init();
        tracing::info!("Development mode: logging to console");
    } else {
        std::fs::create_dir_all(&log_dir)?;
        let log_file = format!("{log_dir}/ragserve.log");
        let file_appender = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(file_appender)
            .json()
            .init();
    }

    tracing::info!("Logging initialized (level: {})", log_level);
    Ok(())
}

/// Startup sequence: resolve a generation backend, load the corpus, produce
/// a ready index, then serve. Any failure here is fatal by design — there is
/// no partial-service state to protect before serving begins.
async fn run(config: Config) -> Result<()> {
    tracing::info!("Configuration: {}", config.summary());

    // Backend discovery blocks the whole startup; no queries are served
    // until a usable generation model is resolved
    let lister = OllamaModelLister::new(&config.ollama_url)?;
    let policy = RetryPolicy {
        max_attempts: config.discovery_attempts,
        delay: Duration::from_secs(config.discovery_delay_secs),
    };
    let model = discovery::discover(
        config.model_override.as_deref(),
        &lister,
        policy,
        &config.ollama_url,
    )
    .await?;

    let corpus_path = Path::new(&config.corpus_path);
    let corpus = Corpus::load(corpus_path, config.max_chars)?;

    let embedder = Arc::new(OllamaEmbedder::new(&config)?);
    let manager = IndexManager::new(&config.data_dir);
    let index = manager
        .ensure_index(&corpus, corpus_path, embedder.as_ref())
        .await?;

    let corpus = Arc::new(corpus);
    let retriever = Arc::new(Retriever::new(
        embedder,
        index,
        corpus.clone(),
        config.top_k,
    ));
    let generator = Arc::new(OllamaGenerator::new(&config, model)?);
    let metrics = Arc::new(MetricsCollector::new());
    let pipeline = Arc::new(QueryPipeline::new(
        QueryValidator::new(config.max_question_chars),
        retriever,
        generator,
        metrics.clone(),
    ));

    tracing::info!(
        "Ready: {} passages indexed, serving with k={}",
        corpus.len(),
        config.top_k
    );

    server::serve(&config.http_bind, ServiceContext { pipeline, metrics }).await
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }
    setup_logging()?;

    let config = Config::from_env();
    if let Err(e) = run(config).await {
        tracing::error!("Fatal startup error: {e:#}");
        eprintln!("Fatal: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
