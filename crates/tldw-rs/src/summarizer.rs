//! The summarizer collaborator: an opaque streaming completion service.
//!
//! Both phases talk to the model through the [`Summarizer`] trait. A call
//! resolves to a [`TokenStream`]: lazy, finite, not restartable, and
//! cancelled by dropping it. Map and reduce therefore share one cancellation
//! and back-pressure story: tokens are only pulled when the consumer polls.
//!
//! [`OpenRouterSummarizer`] is the production implementation.
//! [`SummarizerFactory`] builds one per request, bound to that request's
//! [`Credentials`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tracing::info;

use crate::api::tracing::CostTracker;
use crate::config::SummarizerSettings;
use crate::error::{Error, Result};
use crate::{ChatRequest, Message, OpenRouterClient};

/// Lazy sequence of generated text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Boxed future returned by [`Summarizer::summarize`].
pub type SummarizeFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenStream>> + Send + 'a>>;

/// Which phase a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Map,
    Reduce,
}

/// An instruction plus the text it applies to.
#[derive(Debug, Clone)]
pub struct SummaryPrompt {
    pub kind: PromptKind,
    pub instruction: String,
    pub content: String,
}

/// A streaming text-generation service.
pub trait Summarizer: Send + Sync {
    /// Start generating for `prompt`.
    ///
    /// Resolves once the call is accepted; tokens then arrive on the stream.
    /// Credential rejection must surface as [`Error::Unauthorized`].
    fn summarize(&self, prompt: SummaryPrompt) -> SummarizeFuture<'_>;
}

/// Builds credential-bound summarizers, one per request.
pub trait SummarizerFactory: Send + Sync {
    fn for_credentials(&self, credentials: Credentials) -> Arc<dyn Summarizer>;
}

// ── Credentials ────────────────────────────────────────────────────

/// Bearer credential passed through unchanged to the summarizer service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    /// Wrap a raw token. Empty tokens are rejected.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::unauthorized("empty credential"));
        }
        Ok(Self(token))
    }

    /// Extract the token from an `Authorization: Bearer <token>` header value.
    pub fn from_authorization(header: Option<&str>) -> Result<Self> {
        let header = header.ok_or_else(|| Error::unauthorized("missing Authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::unauthorized("Authorization header must use the Bearer scheme"))?;
        Self::new(token.trim())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

// ── OpenRouter implementation ──────────────────────────────────────

/// [`Summarizer`] backed by the OpenRouter streaming chat API.
pub struct OpenRouterSummarizer {
    client: Arc<OpenRouterClient>,
    credentials: Credentials,
    settings: SummarizerSettings,
    costs: Arc<CostTracker>,
}

impl OpenRouterSummarizer {
    pub fn new(
        client: Arc<OpenRouterClient>,
        credentials: Credentials,
        settings: SummarizerSettings,
    ) -> Self {
        Self {
            client,
            credentials,
            settings,
            costs: Arc::new(CostTracker::new()),
        }
    }

    /// Usage accumulated by every call made through this summarizer.
    pub fn costs(&self) -> &Arc<CostTracker> {
        &self.costs
    }

    fn request_for(&self, prompt: &SummaryPrompt) -> ChatRequest {
        let max_tokens = match prompt.kind {
            PromptKind::Map => self.settings.map_max_tokens,
            PromptKind::Reduce => self.settings.reduce_max_tokens,
        };
        ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                Message::system(&prompt.instruction),
                Message::user(&prompt.content),
            ],
            max_tokens,
            temperature: self.settings.temperature,
            presence_penalty: self.settings.presence_penalty,
            ..Default::default()
        }
    }
}

impl Summarizer for OpenRouterSummarizer {
    fn summarize(&self, prompt: SummaryPrompt) -> SummarizeFuture<'_> {
        let body = self.request_for(&prompt);
        Box::pin(async move {
            let label = format!("{:?} call", prompt.kind);
            let body = &body;
            let client = &self.client;
            let token = self.credentials.token();
            let costs = &self.costs;
            self.settings
                .retry
                .run(&label, move || {
                    client.chat_stream(body, token, Some(costs.clone()))
                })
                .await
        })
    }
}

impl Drop for OpenRouterSummarizer {
    fn drop(&mut self) {
        if self.costs.calls() > 0 {
            info!("Summarizer usage: {}", self.costs.to_log_string());
        }
    }
}

/// Factory producing [`OpenRouterSummarizer`]s that share one HTTP client.
pub struct OpenRouterSummarizerFactory {
    client: Arc<OpenRouterClient>,
    settings: SummarizerSettings,
}

impl OpenRouterSummarizerFactory {
    pub fn new(client: OpenRouterClient, settings: SummarizerSettings) -> Self {
        Self {
            client: Arc::new(client),
            settings,
        }
    }
}

impl SummarizerFactory for OpenRouterSummarizerFactory {
    fn for_credentials(&self, credentials: Credentials) -> Arc<dyn Summarizer> {
        Arc::new(OpenRouterSummarizer::new(
            self.client.clone(),
            credentials,
            self.settings.clone(),
        ))
    }
}
