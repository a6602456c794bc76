//! Convenience re-exports for common `tldw` types.
//!
//! ```ignore
//! use tldw::prelude::*;
//! ```
//!
//! Covers building a pipeline, running it, and framing its output. Lower
//! level pieces (the SSE decoder, map slots, prompt text) stay in their
//! modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Error, OpenRouterClient, Result};

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::config::{FailurePolicy, PipelineConfig, Strategy, SummarizerSettings};
pub use crate::pipeline::{LoggingObserver, Pipeline, PipelineEvent, PipelineObserver, PipelineState};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::summarizer::{
    Credentials, OpenRouterSummarizer, OpenRouterSummarizerFactory, Summarizer, SummarizerFactory,
    TokenStream,
};
pub use crate::transcript::{
    DirectoryTranscripts, StaticTranscripts, Transcript, TranscriptProvider, VideoId,
};

// ── Output ──────────────────────────────────────────────────────────
pub use crate::transport::{Framing, StreamEvent, frame};

pub use futures::StreamExt;
