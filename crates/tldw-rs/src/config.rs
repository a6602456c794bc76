//! Configuration for the [`Pipeline`](crate::pipeline::Pipeline) and the
//! OpenRouter summarizer.
//!
//! Everything has working defaults. Configuration is a plain value handed to
//! each pipeline; nothing here is global, so requests with different settings
//! or credentials never interfere.
//!
//! ```ignore
//! let config = PipelineConfig::default()
//!     .with_max_chunk_tokens(800)
//!     .with_max_concurrency(8)
//!     .with_timeout(Duration::from_secs(120))
//!     .with_failure_policy(FailurePolicy::BestEffort);
//! ```

use std::time::Duration;

use crate::api::retry::RetryConfig;
use crate::error::{Error, Result};

/// Default maximum tokens per chunk.
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 1500;

/// Default number of trailing tokens searched for a sentence end.
pub const DEFAULT_BOUNDARY_LOOKBACK: usize = 48;

/// Default number of map calls in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default model for summarizer calls.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// What to do when a map call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the request on the first failed chunk and cancel the rest.
    #[default]
    FailFast,
    /// Keep going with the chunks that succeeded, marking the gaps.
    /// Still fails if every chunk fails.
    BestEffort,
}

/// How chunk summaries become the final output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Summarize chunks, then combine them with one reduce call.
    #[default]
    MapReduce,
    /// Stream each chunk summary as a section, in order, with no reduce call.
    Sections,
}

/// Settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum lexical tokens per chunk. Default: `1500`.
    pub max_chunk_tokens: usize,
    /// Trailing tokens searched for a sentence end before cutting
    /// mid-sentence. Default: `48`.
    pub boundary_lookback: usize,
    /// Map calls in flight at once. Default: `4`.
    pub max_concurrency: usize,
    /// End-to-end deadline covering every phase. Default: 5 minutes.
    pub timeout: Duration,
    /// Map failure handling. Default: [`FailurePolicy::FailFast`].
    pub failure_policy: FailurePolicy,
    /// Output strategy. Default: [`Strategy::MapReduce`].
    pub strategy: Strategy,
    /// Video id used to turn cited timestamps into links.
    pub video_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: DEFAULT_MAX_CHUNK_TOKENS,
            boundary_lookback: DEFAULT_BOUNDARY_LOOKBACK,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: Duration::from_secs(300),
            failure_policy: FailurePolicy::FailFast,
            strategy: Strategy::MapReduce,
            video_id: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_max_chunk_tokens(mut self, tokens: usize) -> Self {
        self.max_chunk_tokens = tokens;
        self
    }

    pub fn with_boundary_lookback(mut self, tokens: usize) -> Self {
        self.boundary_lookback = tokens;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    /// Reject settings that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_tokens == 0 {
            return Err(Error::configuration("max_chunk_tokens must be greater than 0"));
        }
        if self.max_concurrency == 0 {
            return Err(Error::configuration("max_concurrency must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Settings for calls made through the OpenRouter summarizer.
#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    /// Model identifier. Default: `"openai/gpt-4o-mini"`.
    pub model: String,
    /// Response token limit for each map call. Default: `1000`.
    pub map_max_tokens: u32,
    /// Response token limit for the reduce call. Default: `2000`.
    pub reduce_max_tokens: u32,
    /// Sampling temperature. Default: `0.0`.
    pub temperature: f32,
    /// Presence penalty. Default: `0.6`.
    pub presence_penalty: Option<f32>,
    /// Retry behavior for opening calls.
    pub retry: RetryConfig,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            map_max_tokens: 1000,
            reduce_max_tokens: 2000,
            temperature: 0.0,
            presence_penalty: Some(0.6),
            retry: RetryConfig::default(),
        }
    }
}

impl SummarizerSettings {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry = RetryConfig::with_retries(retries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.strategy, Strategy::MapReduce);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = PipelineConfig::default()
            .with_max_chunk_tokens(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn zero_concurrency_and_timeout_rejected() {
        assert!(
            PipelineConfig::default()
                .with_max_concurrency(0)
                .validate()
                .is_err()
        );
        assert!(
            PipelineConfig::default()
                .with_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn summarizer_settings_builders() {
        let settings = SummarizerSettings::default()
            .with_model("anthropic/claude-haiku-4")
            .with_retries(0);
        assert_eq!(settings.model, "anthropic/claude-haiku-4");
        assert_eq!(settings.retry.max_retries, 0);
    }
}
