//! Error types for the summarization pipeline.
//!
//! Every failure a request can hit maps to one [`Error`] variant. Variants
//! that abort a request before any output is produced (`Configuration`,
//! `TranscriptUnavailable`, `InvalidVideoUrl`, `Unauthorized`) are what the
//! web layer turns into non-success status codes; everything else can also
//! surface mid-stream.

use std::fmt;

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which summarizer call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The per-chunk call for the chunk at this index.
    Map { index: usize },
    /// The combining call over all chunk summaries.
    Reduce,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Map { index } => write!(f, "map chunk {index}"),
            Stage::Reduce => write!(f, "reduce"),
        }
    }
}

/// Errors that can occur while producing a summary.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid pipeline or chunker settings. Rejected before any work starts.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The transcript provider could not supply a transcript.
    #[error("transcript unavailable for {video}: {reason}")]
    TranscriptUnavailable { video: String, reason: String },

    /// The inbound URL does not identify a video.
    #[error("invalid video url: {url}")]
    InvalidVideoUrl { url: String },

    /// Missing, malformed, or rejected summarizer credential.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// A single summarizer call failed or produced a broken stream.
    #[error("summarizer call failed ({stage}): {reason}")]
    SummarizerCallFailed { stage: Stage, reason: String },

    /// Some chunk summaries failed while others were still pending or done.
    #[error("{} of {total} chunk summaries failed (first: {reason})", failed.len())]
    PartialMapFailure {
        failed: Vec<usize>,
        total: usize,
        reason: String,
    },

    /// The end-to-end deadline elapsed before the pipeline finished.
    #[error("pipeline timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// HTTP transport error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a transcript-unavailable error.
    pub fn transcript_unavailable(video: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TranscriptUnavailable {
            video: video.into(),
            reason: reason.into(),
        }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a summarizer failure for the given stage.
    pub fn summarizer(stage: Stage, reason: impl Into<String>) -> Self {
        Self::SummarizerCallFailed {
            stage,
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub const fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Re-tag a summarizer failure with the stage it happened in.
    ///
    /// Summarizer implementations don't know which phase they serve, so they
    /// report [`Stage::Reduce`] by default; the map executor re-tags.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            Self::SummarizerCallFailed { reason, .. } => Self::SummarizerCallFailed { stage, reason },
            Self::Http(e) => Self::SummarizerCallFailed {
                stage,
                reason: e.to_string(),
            },
            other => other,
        }
    }

    /// Stable machine-readable name for structured error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::TranscriptUnavailable { .. } => "transcript_unavailable",
            Self::InvalidVideoUrl { .. } => "invalid_video_url",
            Self::Unauthorized { .. } => "unauthorized",
            Self::SummarizerCallFailed { .. } => "summarizer_call_failed",
            Self::PartialMapFailure { .. } => "partial_map_failure",
            Self::Timeout { .. } => "timeout",
            Self::Http(_) => "http_error",
            Self::Json(_) => "json_error",
        }
    }

    /// Whether the failure is worth retrying when opening a summarizer call.
    ///
    /// Rate limits, upstream 5xx and network-level errors are transient.
    /// Credential and request-shape errors never are.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::SummarizerCallFailed { reason, .. } => is_transient_reason(reason),
            _ => false,
        }
    }
}

/// Whether an upstream error description indicates a transient failure.
pub(crate) fn is_transient_reason(reason: &str) -> bool {
    let transient_statuses = ["429", "500", "502", "503", "504"];
    if transient_statuses
        .iter()
        .any(|s| reason.contains(&format!("HTTP {s}")))
    {
        return true;
    }

    let lower = reason.to_lowercase();
    [
        "connection reset",
        "connection refused",
        "timed out",
        "broken pipe",
    ]
    .iter()
    .any(|p| lower.contains(p))
}
