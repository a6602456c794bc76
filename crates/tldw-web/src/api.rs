//! Endpoint handlers.
//!
//! Both summary routes share one path: pull the bearer credential, build a
//! per-request pipeline, run it up to the first output token, then hand the
//! framed stream to axum. Anything that fails before that point becomes a
//! JSON error response; later failures are written in-band by the framing.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use tldw::Error;
use tldw::config::{PipelineConfig, Strategy};
use tldw::pipeline::Pipeline;
use tldw::summarizer::{Credentials, SummarizerFactory};
use tldw::transcript::{TranscriptProvider, VideoId};
use tldw::transport::{Framing, frame};

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub summarizers: Arc<dyn SummarizerFactory>,
    pub transcripts: Arc<dyn TranscriptProvider>,
    pub pipeline: PipelineConfig,
}

// ── Errors ─────────────────────────────────────────────────────────

/// A pipeline error rendered as `{"error", "kind"}` with a matching status.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            Error::Configuration { .. } | Error::InvalidVideoUrl { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::TranscriptUnavailable { .. } => StatusCode::NOT_FOUND,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::SummarizerCallFailed { .. }
            | Error::PartialMapFailure { .. }
            | Error::Http(_)
            | Error::Json(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!("Request failed with {status}: {}", self.0);
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

// ── Request bodies ─────────────────────────────────────────────────

/// Output strategy requested by a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyParam {
    MapReduce,
    #[default]
    Sections,
}

impl From<StrategyParam> for Strategy {
    fn from(param: StrategyParam) -> Self {
        match param {
            StrategyParam::MapReduce => Strategy::MapReduce,
            StrategyParam::Sections => Strategy::Sections,
        }
    }
}

/// Request body for POST /youtube_markdown.
#[derive(Debug, Deserialize)]
pub struct YoutubeRequest {
    pub url: String,
    #[serde(default)]
    pub use_sse: bool,
    #[serde(default)]
    pub strategy: StrategyParam,
}

/// Request body for POST /shorten_markdown.
#[derive(Debug, Deserialize)]
pub struct ShortenRequest {
    pub content: String,
    #[serde(default)]
    pub use_sse: bool,
}

// ── Handlers ───────────────────────────────────────────────────────

fn credentials(headers: &HeaderMap) -> Result<Credentials, ApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    Ok(Credentials::from_authorization(header)?)
}

/// Run the pipeline and wrap its output as a streaming response.
async fn stream_summary(
    app: &AppState,
    credentials: Credentials,
    config: PipelineConfig,
    text: &str,
    framing: Framing,
) -> Result<Response, ApiError> {
    let summarizer = app.summarizers.for_credentials(credentials);
    let pipeline = Pipeline::new(summarizer, config)?;
    let tokens = pipeline.run(text).await?;

    let body = Body::from_stream(frame(tokens, framing).map(Ok::<_, Infallible>));
    Ok((
        [
            (CONTENT_TYPE, framing.content_type()),
            (CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// POST /youtube_markdown: summarize a video's transcript.
///
/// Defaults to one section per transcript chunk; pass
/// `"strategy": "map_reduce"` for a single combined summary.
pub async fn youtube_markdown(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<YoutubeRequest>,
) -> Result<Response, ApiError> {
    let credentials = credentials(&headers)?;
    let video = VideoId::parse(&body.url)?;
    info!("Summarizing video {video} ({:?})", body.strategy);

    let transcript = app.transcripts.fetch(&video).await?;
    let config = app
        .pipeline
        .clone()
        .with_strategy(body.strategy.into())
        .with_video_id(video.as_str());

    stream_summary(
        &app,
        credentials,
        config,
        &transcript.to_text(),
        Framing::from_sse_flag(body.use_sse),
    )
    .await
}

/// POST /shorten_markdown: summarize caller-supplied text.
pub async fn shorten_markdown(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ShortenRequest>,
) -> Result<Response, ApiError> {
    let credentials = credentials(&headers)?;
    info!("Summarizing {} bytes of content", body.content.len());

    let config = app.pipeline.clone().with_strategy(Strategy::MapReduce);
    stream_summary(
        &app,
        credentials,
        config,
        &body.content,
        Framing::from_sse_flag(body.use_sse),
    )
    .await
}

/// GET /check: liveness probe.
pub async fn check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
