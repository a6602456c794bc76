//! Streaming map-reduce summarization of long transcripts.
//!
//! `tldw-rs` turns an arbitrarily long transcript into a single markdown
//! summary that starts streaming to the caller as soon as the final phase
//! produces its first token. Text is split into bounded chunks, each chunk is
//! summarized concurrently (map), and the ordered summaries are combined by
//! one final streaming call (reduce).
//!
//! ```ignore
//! use std::sync::Arc;
//! use tldw::prelude::*;
//!
//! let summarizer = OpenRouterSummarizerFactory::new(
//!     OpenRouterClient::new()?,
//!     SummarizerSettings::default(),
//! )
//! .for_credentials(Credentials::new(api_key)?);
//!
//! let pipeline = Pipeline::new(summarizer, PipelineConfig::default())?;
//! let mut tokens = pipeline.run(&transcript).await?;
//! while let Some(token) = tokens.next().await {
//!     print!("{}", token?);
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Splitting text:** [`chunker`] tokenizes lexically and packs tokens into
//!   chunks, preferring sentence boundaries.
//! - **Talking to the model:** the [`Summarizer`](summarizer::Summarizer)
//!   trait is the only seam to the completion service.
//!   [`OpenRouterSummarizer`](summarizer::OpenRouterSummarizer) implements it
//!   over [`api::streaming`].
//! - **Running a request:** [`Pipeline`](pipeline::Pipeline) sequences
//!   chunking, the concurrent [`map`] phase and the [`reduce`] phase under one
//!   deadline, reporting state changes to a
//!   [`PipelineObserver`](pipeline::PipelineObserver).
//! - **Writing output:** [`transport`] frames a token stream as raw text or
//!   server-sent events.
//! - **Getting transcripts:** [`transcript`] parses video URLs and loads
//!   transcripts through a [`TranscriptProvider`](transcript::TranscriptProvider).
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | SSE streaming client, retry with backoff, run ids and cost tracking |
//! | [`chunker`] | Lexical tokenizer and boundary-aware chunker |
//! | [`config`] | [`PipelineConfig`](config::PipelineConfig), failure policy, summarizer settings |
//! | [`error`] | [`Error`](error::Error) taxonomy |
//! | [`map`] | Bounded-concurrency per-chunk summarization with ordered results |
//! | [`pipeline`] | Request orchestration, deadline, observer |
//! | [`prompt`] | Map and reduce instructions |
//! | [`reduce`] | Final combining call and single-chunk shortcut |
//! | [`summarizer`] | Summarizer trait, credentials, OpenRouter implementation |
//! | [`transcript`] | Video ids, transcripts, providers |
//! | [`transport`] | Raw and event-stream framing |

pub mod api;
pub mod chunker;
pub mod config;
pub mod error;
pub mod map;
pub mod pipeline;
pub mod prelude;
pub mod prompt;
pub mod reduce;
pub mod summarizer;
#[cfg(test)]
mod testing;
pub mod transcript;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use config::DEFAULT_MODEL;
pub use error::{Error, Result};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unset optional fields are omitted.
#[derive(Serialize, Debug, Default, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
///
/// Holds no credential: every call is authorized with the key of the request
/// it serves, so one client can be shared across all requests.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) url: String,
    pub(crate) referer: String,
    pub(crate) title: String,
}

impl OpenRouterClient {
    /// Create a client with the default headers.
    pub fn new() -> Result<Self> {
        Self::with_headers("https://github.com/tacryt-socryp/tldw-rs", "tldw-rs")
    }

    /// Create a client with custom Referer and X-Title headers.
    pub fn with_headers(referer: impl Into<String>, title: impl Into<String>) -> Result<Self> {
        // No overall timeout: reduce streams can legitimately run for minutes.
        // The pipeline deadline bounds the whole request instead.
        let client = reqwest::Client::builder()
            .user_agent("tldw-rs/0.1")
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: OPENROUTER_URL.to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Point the client at a different completions endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_fields() {
        let req = ChatRequest {
            model: "openai/gpt-4o-mini".into(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            max_tokens: 100,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "openai/gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json.get("presence_penalty").is_none());
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn base_url_override() {
        let client = OpenRouterClient::new()
            .unwrap()
            .with_base_url("http://127.0.0.1:9/v1/chat/completions");
        assert_eq!(client.url, "http://127.0.0.1:9/v1/chat/completions");
    }
}
