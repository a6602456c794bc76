//! Summarize a local transcript and stream the result to stdout.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Summarize a file
//! tldw --file lecture.txt
//!
//! # Pipe from stdin, bigger chunks, more parallelism
//! cat lecture.txt | tldw --stdin --max-chunk-tokens 3000 --concurrency 8
//!
//! # One section per chunk, framed as server-sent events
//! tldw --file lecture.txt --sections --sse
//! ```

use std::io::{self, Read, Write};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tldw::prelude::*;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Summarize a transcript with a streaming map-reduce pipeline.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "tldw")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Transcript file to summarize
    #[arg(long, conflicts_with = "stdin")]
    file: Option<String>,

    /// Read the transcript from stdin
    #[arg(long)]
    stdin: bool,

    /// Video id used for timestamp links
    #[arg(long)]
    video_id: Option<String>,

    // ── Model ──────────────────────────────────────────────────
    /// Model used for every call
    #[arg(long, default_value = tldw::DEFAULT_MODEL)]
    model: String,

    /// Retries for opening a call after a transient failure
    #[arg(long, default_value_t = 2)]
    retries: u32,

    // ── Pipeline ───────────────────────────────────────────────
    /// Maximum tokens per chunk
    #[arg(long, default_value_t = tldw::config::DEFAULT_MAX_CHUNK_TOKENS)]
    max_chunk_tokens: usize,

    /// Chunk summaries requested at once
    #[arg(long, default_value_t = tldw::config::DEFAULT_MAX_CONCURRENCY)]
    concurrency: usize,

    /// End-to-end deadline in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Continue past failed chunks instead of aborting
    #[arg(long)]
    best_effort: bool,

    /// Print one section per chunk instead of a single combined summary
    #[arg(long)]
    sections: bool,

    // ── Output ─────────────────────────────────────────────────
    /// Frame output as server-sent events ending in `data: [DONE]`
    #[arg(long)]
    sse: bool,
}

fn read_transcript(cli: &Cli) -> std::result::Result<String, String> {
    if let Some(path) = &cli.file {
        return std::fs::read_to_string(path).map_err(|e| format!("failed to read '{path}': {e}"));
    }
    if cli.stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        return Ok(buf);
    }
    Err("pass --file <PATH> or --stdin".to_string())
}

fn pipeline_config(cli: &Cli) -> PipelineConfig {
    let mut config = PipelineConfig::default()
        .with_max_chunk_tokens(cli.max_chunk_tokens)
        .with_max_concurrency(cli.concurrency)
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    if cli.best_effort {
        config = config.with_failure_policy(FailurePolicy::BestEffort);
    }
    if cli.sections {
        config = config.with_strategy(Strategy::Sections);
    }
    if let Some(id) = &cli.video_id {
        config = config.with_video_id(id.clone());
    }
    config
}

/// Run the pipeline, writing framed output as it arrives. Returns whether
/// the run finished cleanly.
async fn summarize(cli: &Cli) -> std::result::Result<bool, String> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let credentials = Credentials::new(api_key).map_err(|e| e.to_string())?;
    let transcript = read_transcript(cli)?;

    let client = OpenRouterClient::new().map_err(|e| e.to_string())?;
    let settings = SummarizerSettings::default()
        .with_model(&cli.model)
        .with_retries(cli.retries);
    let summarizer = Arc::new(OpenRouterSummarizer::new(Arc::new(client), credentials, settings));
    let costs = Arc::clone(summarizer.costs());

    let pipeline = Pipeline::new(summarizer, pipeline_config(cli)).map_err(|e| e.to_string())?;
    let tokens = pipeline.run(&transcript).await.map_err(|e| e.to_string())?;

    let failed = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&failed);
    let tokens: TokenStream = Box::pin(tokens.inspect(move |token| {
        if token.is_err() {
            seen.store(true, Ordering::Relaxed);
        }
    }));

    let mut frames = frame(tokens, Framing::from_sse_flag(cli.sse));
    let mut stdout = io::stdout().lock();
    while let Some(chunk) = frames.next().await {
        stdout
            .write_all(chunk.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|e| format!("failed to write output: {e}"))?;
    }
    if !cli.sse {
        writeln!(stdout).map_err(|e| format!("failed to write output: {e}"))?;
    }

    eprintln!("--- {} ---", costs.to_log_string());
    Ok(!failed.load(Ordering::Relaxed))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match summarize(&cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
