//! API interaction layer: streaming client support, retry, and cost tracking.
//!
//! These modules handle everything between the
//! [`OpenRouterSummarizer`](crate::summarizer::OpenRouterSummarizer) and the
//! OpenRouter API:
//!
//! - [`streaming`]: incremental SSE parser producing a lazy token stream.
//! - [`retry`]: exponential backoff for opening calls. Never retries 401/403.
//! - [`tracing`]: run correlation ids, per-model pricing, and the
//!   [`CostTracker`] shared by every call of one request.

pub mod retry;
pub mod streaming;
pub mod tracing;

pub use retry::RetryConfig;
pub use tracing::{CostTracker, generate_run_id, pricing_for_model};
