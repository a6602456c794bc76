//! Correlation IDs and cost tracking for summarization runs.
//!
//! Assigns a unique run id to each pipeline run (attached to its tracing
//! span) and accumulates token usage reported by every summarizer call,
//! map and reduce alike, into an estimated spend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::UsageInfo;

/// Generate a unique id for a pipeline run.
pub fn generate_run_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates runs started within the same nanosecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{ts:x}-{count:04x}")
}

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone)]
pub struct ModelPricing {
    /// Price per 1M input tokens.
    pub input_per_million: f64,
    /// Price per 1M output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Estimate cost for given token counts.
    pub fn estimate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

/// Lookup approximate pricing for a model by name.
///
/// Matches on the segment after the last `/` so org prefixes don't cause
/// false positives.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    // Approximate; good enough to spot a runaway fan-out, not for billing.
    if name.contains("mini") || name.contains("flash") || name.contains("haiku") {
        ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        }
    } else if name.contains("gpt-4o") {
        ModelPricing {
            input_per_million: 2.5,
            output_per_million: 10.0,
        }
    } else if name.contains("opus") {
        ModelPricing {
            input_per_million: 15.0,
            output_per_million: 75.0,
        }
    } else {
        ModelPricing::default()
    }
}

/// Cumulative usage across every call made on behalf of one request.
///
/// Map tasks record concurrently, so counters are atomics. Cost is kept in
/// micro-dollars to stay integral.
#[derive(Debug, Default)]
pub struct CostTracker {
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    cost_micro_usd: AtomicU64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the usage block reported at the end of one call.
    pub fn record(&self, model: &str, usage: &UsageInfo) {
        let prompt = u64::from(usage.prompt_tokens.unwrap_or(0));
        let completion = u64::from(usage.completion_tokens.unwrap_or(0));
        let cost = pricing_for_model(model).estimate_cost(prompt, completion);

        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.cost_micro_usd
            .fetch_add((cost * 1_000_000.0).round() as u64, Ordering::Relaxed);
    }

    /// Number of calls that reported usage.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total tokens (prompt + completion).
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed) + self.completion_tokens.load(Ordering::Relaxed)
    }

    /// Estimated spend in USD.
    pub fn estimated_cost_usd(&self) -> f64 {
        self.cost_micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "{} calls | {} tokens | ${:.4}",
            self.calls(),
            self.total_tokens(),
            self.estimated_cost_usd()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }

    #[test]
    fn pricing_matches_model_segment() {
        let mini = pricing_for_model("openai/gpt-4o-mini");
        assert!((mini.input_per_million - 0.15).abs() < f64::EPSILON);
        let full = pricing_for_model("openai/gpt-4o");
        assert!((full.input_per_million - 2.5).abs() < f64::EPSILON);
        let unknown = pricing_for_model("some-org/custom");
        assert!((unknown.output_per_million - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tracker_accumulates_usage() {
        let tracker = CostTracker::new();
        let usage = UsageInfo {
            prompt_tokens: Some(1_000_000),
            completion_tokens: Some(0),
            total_tokens: Some(1_000_000),
        };
        tracker.record("openai/gpt-4o", &usage);
        tracker.record("openai/gpt-4o", &usage);
        assert_eq!(tracker.calls(), 2);
        assert_eq!(tracker.total_tokens(), 2_000_000);
        assert!((tracker.estimated_cost_usd() - 5.0).abs() < 1e-9);
        assert!(tracker.to_log_string().contains("2 calls"));
    }
}
