//! Concurrent per-chunk summarization.
//!
//! [`MapExecutor`] spawns one task per chunk onto a [`JoinSet`], bounded by a
//! semaphore. Results land in a fixed slot per chunk index as tasks finish,
//! so completion order never leaks into output order. Two ways to consume:
//!
//! - [`MapExecutor::map_summarize`] waits for every slot, then hands back
//!   the summaries in index order (feeds the reduce phase).
//! - [`MapExecutor::map_ordered_stream`] releases each summary as soon as
//!   every lower-indexed slot has been released (section-by-section output).
//!
//! Dropping either one drops the `JoinSet`, which aborts every outstanding
//! task and the summarizer calls inside it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt, stream};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::config::FailurePolicy;
use crate::error::{Error, Result, Stage};
use crate::pipeline::{PipelineEvent, Reporter};
use crate::prompt::map_prompt;
use crate::summarizer::{Summarizer, SummaryPrompt};

/// The summary produced for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    pub index: usize,
    pub text: String,
}

/// Every chunk summary of a request, in chunk order.
#[derive(Debug, Clone, Default)]
pub struct MapOutcome {
    /// Successful summaries, sorted by index.
    pub summaries: Vec<ChunkSummary>,
    /// Indices whose summary failed (only non-empty under best effort).
    pub gaps: Vec<usize>,
    /// Number of chunks submitted.
    pub total: usize,
}

impl MapOutcome {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// One item of [`MapExecutor::map_ordered_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Summarized(ChunkSummary),
    /// The chunk at this index failed and the policy allows continuing.
    Missing { index: usize },
}

/// Index-ordered stream of released sections.
pub type SectionStream = Pin<Box<dyn Stream<Item = Result<Section>> + Send>>;

/// Summarize `prompt` and accumulate the whole reply.
pub async fn collect_text(summarizer: &dyn Summarizer, prompt: SummaryPrompt) -> Result<String> {
    let mut tokens = summarizer.summarize(prompt).await?;
    let mut text = String::new();
    while let Some(token) = tokens.next().await {
        text.push_str(&token?);
    }
    Ok(text)
}

// ── Result slots ───────────────────────────────────────────────────

#[derive(Debug)]
enum Slot {
    Pending,
    Ready(String),
    Failed,
    Released,
}

/// Fixed slot per chunk index plus a completion counter.
///
/// Only the collecting task touches it; map tasks hand their result back
/// through the `JoinSet`.
struct Collector {
    slots: Vec<Slot>,
    completed: usize,
    succeeded: usize,
    failed: Vec<usize>,
    first_error: Option<Error>,
    policy: FailurePolicy,
    reporter: Option<Reporter>,
}

impl Collector {
    fn new(total: usize, policy: FailurePolicy, reporter: Option<Reporter>) -> Self {
        Self {
            slots: (0..total).map(|_| Slot::Pending).collect(),
            completed: 0,
            succeeded: 0,
            failed: Vec::new(),
            first_error: None,
            policy,
            reporter,
        }
    }

    fn total(&self) -> usize {
        self.slots.len()
    }

    /// Record one finished task. `Err` means the request must abort.
    fn record(&mut self, index: usize, result: Result<String>) -> Result<()> {
        self.completed += 1;
        match result {
            Ok(text) => {
                debug!(
                    "Map chunk {index}: done ({}/{}, {} chars)",
                    self.completed,
                    self.total(),
                    text.len()
                );
                self.slots[index] = Slot::Ready(text);
                self.succeeded += 1;
                if let Some(reporter) = &self.reporter {
                    reporter.emit(&PipelineEvent::ChunkSummarized {
                        index,
                        done: self.completed,
                        total: self.total(),
                    });
                }
                Ok(())
            }
            Err(e) => self.fail(index, e),
        }
    }

    fn fail(&mut self, index: usize, error: Error) -> Result<()> {
        self.slots[index] = Slot::Failed;
        self.failed.push(index);
        if let Some(reporter) = &self.reporter {
            reporter.emit(&PipelineEvent::ChunkFailed {
                index,
                error: &error,
            });
        }

        if matches!(error, Error::Unauthorized { .. }) {
            return Err(error);
        }
        match self.policy {
            FailurePolicy::FailFast => {
                warn!("Map chunk {index} failed, aborting remaining chunks: {error}");
                Err(self.escalate(error))
            }
            FailurePolicy::BestEffort => {
                warn!("Map chunk {index} failed, continuing without it: {error}");
                if self.first_error.is_none() {
                    self.first_error = Some(error);
                }
                Ok(())
            }
        }
    }

    fn escalate(&self, error: Error) -> Error {
        if self.total() == 1 {
            return error;
        }
        let mut failed = self.failed.clone();
        failed.sort_unstable();
        Error::PartialMapFailure {
            failed,
            total: self.total(),
            reason: error.to_string(),
        }
    }

    fn all_failed(&mut self) -> Error {
        self.first_error
            .take()
            .unwrap_or_else(|| Error::summarizer(Stage::Map { index: 0 }, "every chunk summary failed"))
    }

    fn first_pending(&self) -> Option<usize> {
        self.slots.iter().position(|slot| matches!(slot, Slot::Pending))
    }

    /// Release the slot at `index` if it has resolved.
    ///
    /// A failed slot is held back until some chunk has succeeded, so a run
    /// where every chunk fails yields the error before any section.
    fn release(&mut self, index: usize) -> Option<Result<Section>> {
        match std::mem::replace(&mut self.slots[index], Slot::Released) {
            Slot::Ready(text) => Some(Ok(Section::Summarized(ChunkSummary { index, text }))),
            Slot::Failed if self.failed.len() == self.total() => Some(Err(self.all_failed())),
            Slot::Failed if self.succeeded > 0 || self.first_pending().is_none() => {
                Some(Ok(Section::Missing { index }))
            }
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    /// Treat slots whose task vanished as failed, then assemble the outcome.
    fn finish(mut self) -> Result<MapOutcome> {
        let lost: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Pending))
            .map(|(i, _)| i)
            .collect();
        for index in lost {
            self.fail(
                index,
                Error::summarizer(Stage::Map { index }, "map task did not complete"),
            )?;
        }

        let total = self.total();
        if total > 0 && self.failed.len() == total {
            return Err(self.all_failed());
        }

        let mut gaps = std::mem::take(&mut self.failed);
        gaps.sort_unstable();
        let summaries = self
            .slots
            .into_iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Ready(text) => Some(ChunkSummary { index, text }),
                _ => None,
            })
            .collect();

        Ok(MapOutcome {
            summaries,
            gaps,
            total,
        })
    }
}

// ── MapExecutor ────────────────────────────────────────────────────

/// Bounded-concurrency map phase over one request's chunks.
pub struct MapExecutor {
    summarizer: Arc<dyn Summarizer>,
    max_concurrency: usize,
    failure_policy: FailurePolicy,
    video_id: Option<String>,
    reporter: Option<Reporter>,
}

impl MapExecutor {
    pub fn new(summarizer: Arc<dyn Summarizer>, max_concurrency: usize) -> Self {
        Self {
            summarizer,
            max_concurrency: max_concurrency.max(1),
            failure_policy: FailurePolicy::default(),
            video_id: None,
            reporter: None,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_video_id(mut self, video_id: Option<String>) -> Self {
        self.video_id = video_id;
        self
    }

    pub(crate) fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn spawn_all(&self, chunks: &[Chunk]) -> MapTasks {
        let total = chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut js = JoinSet::new();
        let mut indices = HashMap::with_capacity(total);

        for (index, chunk) in chunks.iter().enumerate() {
            let prompt = map_prompt(chunk, total, self.video_id.as_deref());
            let summarizer = Arc::clone(&self.summarizer);
            let semaphore = Arc::clone(&semaphore);
            let handle = js.spawn(async move {
                let stage = Stage::Map { index };
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Err(Error::summarizer(stage, "concurrency limiter closed")));
                };
                debug!("Map chunk {index}: calling summarizer");
                let result = AssertUnwindSafe(collect_text(summarizer.as_ref(), prompt))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::summarizer(stage, "map task panicked")))
                    .map_err(|e| e.at_stage(stage));
                (index, result)
            });
            indices.insert(handle.id(), index);
        }
        MapTasks { js, indices }
    }

    /// Summarize every chunk and return the summaries in chunk order.
    ///
    /// Under [`FailurePolicy::FailFast`] the first failure cancels every
    /// outstanding call. [`Error::Unauthorized`] always aborts.
    pub async fn map_summarize(&self, chunks: &[Chunk]) -> Result<MapOutcome> {
        let total = chunks.len();
        if total == 0 {
            return Ok(MapOutcome::default());
        }
        info!(
            "Map: summarizing {total} chunks, at most {} at a time",
            self.max_concurrency
        );

        let mut tasks = self.spawn_all(chunks);
        let mut collector = Collector::new(total, self.failure_policy, self.reporter.clone());

        while let Some(joined) = tasks.js.join_next().await {
            match joined {
                // Early return drops `tasks`, aborting the rest.
                Ok((index, result)) => collector.record(index, result)?,
                Err(e) => match tasks.lost(&e) {
                    Some((index, error)) => collector.fail(index, error)?,
                    None => warn!("Map task ended abnormally: {e}"),
                },
            }
        }

        let outcome = collector.finish()?;
        info!(
            "Map: {} of {} chunk summaries ready",
            outcome.summaries.len(),
            outcome.total
        );
        Ok(outcome)
    }

    /// Summarize every chunk, releasing summaries in chunk order as soon as
    /// their predecessors have been released.
    ///
    /// Tasks start immediately; the stream only decides release order.
    pub fn map_ordered_stream(&self, chunks: &[Chunk]) -> SectionStream {
        let total = chunks.len();
        if total > 0 {
            info!(
                "Map: streaming {total} chunk summaries, at most {} at a time",
                self.max_concurrency
            );
        }
        let state = OrderedState {
            tasks: self.spawn_all(chunks),
            collector: Collector::new(total, self.failure_policy, self.reporter.clone()),
            next: 0,
            finished: total == 0,
        };
        Box::pin(stream::unfold(state, next_section))
    }
}

/// Spawned map tasks plus the chunk index each one serves.
struct MapTasks {
    js: JoinSet<(usize, Result<String>)>,
    indices: HashMap<task::Id, usize>,
}

impl MapTasks {
    /// The chunk whose task ended with `error`, and the failure to record.
    fn lost(&self, error: &JoinError) -> Option<(usize, Error)> {
        let index = *self.indices.get(&error.id())?;
        warn!("Map chunk {index}: task ended abnormally: {error}");
        Some((
            index,
            Error::summarizer(Stage::Map { index }, "map task did not complete"),
        ))
    }
}

struct OrderedState {
    tasks: MapTasks,
    collector: Collector,
    next: usize,
    finished: bool,
}

async fn next_section(mut st: OrderedState) -> Option<(Result<Section>, OrderedState)> {
    loop {
        if st.finished || st.next >= st.collector.total() {
            return None;
        }

        if let Some(released) = st.collector.release(st.next) {
            st.next += 1;
            if released.is_err() {
                st.finished = true;
                st.tasks.js.abort_all();
            }
            return Some((released, st));
        }

        let joined = match st.tasks.js.join_next().await {
            Some(Ok((index, result))) => st.collector.record(index, result),
            Some(Err(e)) => match st.tasks.lost(&e) {
                Some((index, error)) => st.collector.fail(index, error),
                None => Ok(()),
            },
            // Every task has reported; whatever is still pending was lost.
            None => match st.collector.first_pending() {
                Some(index) => st.collector.fail(
                    index,
                    Error::summarizer(Stage::Map { index }, "map task did not complete"),
                ),
                None => {
                    st.finished = true;
                    return None;
                }
            },
        };
        if let Err(e) = joined {
            st.finished = true;
            st.tasks.js.abort_all();
            return Some((Err(e), st));
        }
    }
}
