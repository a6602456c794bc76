//! HTTP front end for `tldw` summaries.
//!
//! `tldw-web` exposes the summarization pipeline over axum. Every request
//! brings its own `Authorization: Bearer <key>`, which is handed unchanged to
//! a summarizer built just for that request.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tldw::prelude::*;
//! use tldw_web::{WebConfig, spawn_web};
//!
//! let summarizers = Arc::new(OpenRouterSummarizerFactory::new(
//!     OpenRouterClient::new()?,
//!     SummarizerSettings::default(),
//! ));
//! let transcripts = Arc::new(DirectoryTranscripts::new("transcripts"));
//!
//! let addr = spawn_web(summarizers, transcripts, WebConfig::default()).await?;
//! println!("Listening on http://{addr}");
//! ```
//!
//! # Routes
//!
//! | Route | Body | Output |
//! |-------|------|--------|
//! | `POST /youtube_markdown` | `{"url", "use_sse"?, "strategy"?}` | Summary of the video's transcript |
//! | `POST /shorten_markdown` | `{"content", "use_sse"?}` | Summary of the given text |
//! | `GET /check` | | `{"status": "ok"}` |
//!
//! Output is `text/plain` by default, or `text/event-stream` ending in
//! `data: [DONE]` when `use_sse` is set. Failures before the first byte get
//! a JSON error body and a matching status code.

mod api;
mod server;

pub use api::{AppState, ShortenRequest, StrategyParam, YoutubeRequest};
pub use server::{build_router, start_server};

use std::net::SocketAddr;
use std::sync::Arc;

use tldw::config::PipelineConfig;
use tldw::summarizer::SummarizerFactory;
use tldw::transcript::TranscriptProvider;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:8000`.
    pub bind_addr: SocketAddr,
    /// Base pipeline settings applied to every request.
    pub pipeline: PipelineConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(
    summarizers: Arc<dyn SummarizerFactory>,
    transcripts: Arc<dyn TranscriptProvider>,
    config: WebConfig,
) -> std::io::Result<SocketAddr> {
    let state = AppState {
        summarizers,
        transcripts,
        pipeline: config.pipeline,
    };
    let router = build_router(state);
    start_server(router, config.bind_addr).await
}
