//! Serve `tldw` summaries over HTTP.
//!
//! Clients authenticate every request with their own OpenRouter key in an
//! `Authorization: Bearer` header; the server holds no key of its own.
//!
//! ```sh
//! tldw-web --port 8000 --transcripts-dir ./transcripts
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tldw::prelude::*;
use tldw_web::{WebConfig, spawn_web};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// HTTP server for streaming transcript summaries.
#[derive(Parser)]
#[command(name = "tldw-web")]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Directory of `<video_id>.json` or `<video_id>.txt` transcripts
    #[arg(long, default_value = "transcripts")]
    transcripts_dir: PathBuf,

    /// Model used for every call
    #[arg(long, default_value = tldw::DEFAULT_MODEL)]
    model: String,

    /// Retries for opening a call after a transient failure
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Maximum tokens per chunk
    #[arg(long, default_value_t = tldw::config::DEFAULT_MAX_CHUNK_TOKENS)]
    max_chunk_tokens: usize,

    /// Chunk summaries requested at once, per request
    #[arg(long, default_value_t = tldw::config::DEFAULT_MAX_CONCURRENCY)]
    concurrency: usize,

    /// End-to-end deadline per request in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Continue past failed chunks instead of aborting
    #[arg(long)]
    best_effort: bool,
}

async fn serve(cli: Cli) -> std::result::Result<(), String> {
    let mut pipeline = PipelineConfig::default()
        .with_max_chunk_tokens(cli.max_chunk_tokens)
        .with_max_concurrency(cli.concurrency)
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    if cli.best_effort {
        pipeline = pipeline.with_failure_policy(FailurePolicy::BestEffort);
    }
    pipeline.validate().map_err(|e| e.to_string())?;

    let client = OpenRouterClient::new().map_err(|e| e.to_string())?;
    let settings = SummarizerSettings::default()
        .with_model(&cli.model)
        .with_retries(cli.retries);
    let summarizers = Arc::new(OpenRouterSummarizerFactory::new(client, settings));
    let transcripts = Arc::new(DirectoryTranscripts::new(cli.transcripts_dir.clone()));

    let config = WebConfig {
        bind_addr: SocketAddr::new(cli.host, cli.port),
        pipeline,
    };
    let addr = spawn_web(summarizers, transcripts, config)
        .await
        .map_err(|e| format!("failed to bind: {e}"))?;
    eprintln!("tldw-web listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to wait for shutdown signal: {e}"))?;
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = serve(Cli::parse()).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
