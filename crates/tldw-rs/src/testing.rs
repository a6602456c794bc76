//! Scripted in-memory summarizer for unit tests.
//!
//! Map replies are `S<n>` for excerpt `n` (1-based), split over two tokens.
//! Reduce replies are `Final summary`. Delays, failures and hangs are keyed
//! on the chunk index parsed back out of the map prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream;

use crate::error::{Error, Result, Stage};
use crate::summarizer::{PromptKind, SummarizeFuture, Summarizer, SummaryPrompt, TokenStream};

#[derive(Debug, Default)]
pub(crate) struct CallStats {
    pub map_calls: AtomicUsize,
    pub reduce_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// Counts a call as in flight until dropped.
struct CallGuard(Arc<CallStats>);

impl CallGuard {
    fn enter(stats: &Arc<CallStats>) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

type DelayFn = Box<dyn Fn(usize) -> Duration + Send + Sync>;

pub(crate) struct ScriptedSummarizer {
    stats: Arc<CallStats>,
    map_delay: DelayFn,
    failing: Vec<usize>,
    hanging: Vec<usize>,
    reject_credentials: bool,
    fail_reduce: bool,
    break_reduce: bool,
    reduce_token_delay: Duration,
    prompts: Mutex<Vec<SummaryPrompt>>,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(CallStats::default()),
            map_delay: Box::new(|_| Duration::ZERO),
            failing: Vec::new(),
            hanging: Vec::new(),
            reject_credentials: false,
            fail_reduce: false,
            break_reduce: false,
            reduce_token_delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.map_delay = Box::new(delay);
        self
    }

    pub fn failing(mut self, indices: &[usize]) -> Self {
        self.failing = indices.to_vec();
        self
    }

    pub fn hanging(mut self, indices: &[usize]) -> Self {
        self.hanging = indices.to_vec();
        self
    }

    pub fn rejecting_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    /// Reduce call is refused outright.
    pub fn failing_reduce(mut self) -> Self {
        self.fail_reduce = true;
        self
    }

    /// Reduce stream errors after its first token.
    pub fn breaking_reduce(mut self) -> Self {
        self.break_reduce = true;
        self
    }

    pub fn with_reduce_token_delay(mut self, delay: Duration) -> Self {
        self.reduce_token_delay = delay;
        self
    }

    pub fn stats(&self) -> &Arc<CallStats> {
        &self.stats
    }

    pub fn prompts(&self) -> Vec<SummaryPrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Content of the reduce prompt, if a reduce call was made.
    pub fn reduce_input(&self) -> Option<String> {
        self.prompts()
            .into_iter()
            .find(|p| p.kind == PromptKind::Reduce)
            .map(|p| p.content)
    }
}

/// Recover the chunk index from "Excerpt <n> of <total>:".
fn excerpt_index(content: &str) -> usize {
    content
        .strip_prefix("Excerpt ")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse::<usize>().ok())
        .map_or(0, |n| n.saturating_sub(1))
}

fn token_stream(items: Vec<Result<String>>, delay: Duration, guard: CallGuard) -> TokenStream {
    Box::pin(stream::unfold(
        (items.into_iter(), guard),
        move |(mut items, guard)| async move {
            let item = items.next()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((item, (items, guard)))
        },
    ))
}

impl Summarizer for ScriptedSummarizer {
    fn summarize(&self, prompt: SummaryPrompt) -> SummarizeFuture<'_> {
        Box::pin(async move {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.clone());
            }
            let guard = CallGuard::enter(&self.stats);
            if self.reject_credentials {
                return Err(Error::unauthorized("OpenRouter API HTTP 401: invalid key"));
            }

            match prompt.kind {
                PromptKind::Map => {
                    self.stats.map_calls.fetch_add(1, Ordering::SeqCst);
                    let index = excerpt_index(&prompt.content);
                    if self.hanging.contains(&index) {
                        std::future::pending::<()>().await;
                    }
                    tokio::time::sleep((self.map_delay)(index)).await;
                    if self.failing.contains(&index) {
                        return Err(Error::summarizer(
                            Stage::Reduce,
                            format!("OpenRouter API HTTP 400: chunk {index} rejected"),
                        ));
                    }
                    let tokens = vec![Ok("S".to_string()), Ok(format!("{}", index + 1))];
                    Ok(token_stream(tokens, Duration::ZERO, guard))
                }
                PromptKind::Reduce => {
                    self.stats.reduce_calls.fetch_add(1, Ordering::SeqCst);
                    if self.fail_reduce {
                        return Err(Error::summarizer(Stage::Reduce, "OpenRouter API HTTP 400: too long"));
                    }
                    let tokens = if self.break_reduce {
                        vec![
                            Ok("Final".to_string()),
                            Err(Error::summarizer(Stage::Reduce, "stream error: provider went away")),
                        ]
                    } else {
                        vec![Ok("Final".to_string()), Ok(" summary".to_string())]
                    };
                    Ok(token_stream(tokens, self.reduce_token_delay, guard))
                }
            }
        })
    }
}
