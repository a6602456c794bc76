//! Request orchestration: chunk, map, reduce, stream.
//!
//! A [`Pipeline`] owns one request's configuration and summarizer. Each
//! [`Pipeline::run`] walks the state machine
//!
//! ```text
//! Received → Chunking → Mapping → Reducing → Streaming → Completed
//!                 └──────────┴──────────┴──────────┴────→ Failed
//! ```
//!
//! Everything up to the first reduce token happens inside `run`, so failures
//! there come back as `Err` while the caller can still pick a status code.
//! After that, errors travel in-band on the returned stream. One deadline
//! covers both halves: a run that outlives it fails with [`Error::Timeout`]
//! instead of being silently cut short.
//!
//! Progress goes to a [`PipelineObserver`]; the default
//! [`LoggingObserver`] writes it through `tracing`.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::{StreamExt, stream};
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::api::tracing::generate_run_id;
use crate::chunker::Chunker;
use crate::config::{PipelineConfig, Strategy};
use crate::error::{Error, Result};
use crate::map::{MapExecutor, Section, SectionStream};
use crate::prompt::missing_section_note;
use crate::reduce::reduce_summarize;
use crate::summarizer::{Summarizer, TokenStream};

// ── States, events & observer trait ─────────────────────────────────

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Chunking,
    Mapping,
    Reducing,
    Streaming,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Chunking => "chunking",
            Self::Mapping => "mapping",
            Self::Reducing => "reducing",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress events emitted during a run.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    /// The run moved between states.
    Transition {
        from: PipelineState,
        to: PipelineState,
    },
    /// The transcript was split.
    Chunked { chunks: usize, tokens: usize },
    /// One chunk summary is ready.
    ChunkSummarized {
        index: usize,
        done: usize,
        total: usize,
    },
    /// One chunk summary failed.
    ChunkFailed { index: usize, error: &'a Error },
    /// The run failed; `error` is what the caller receives.
    Failed { error: &'a Error },
    /// The consumer dropped the output before it finished.
    Cancelled,
}

/// Receives progress events for every run of a [`Pipeline`].
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, run_id: &str, event: &PipelineEvent<'_>);
}

/// [`PipelineObserver`] that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl PipelineObserver for LoggingObserver {
    fn on_event(&self, run_id: &str, event: &PipelineEvent<'_>) {
        match event {
            PipelineEvent::Transition { from, to } => info!("[{run_id}] {from} -> {to}"),
            PipelineEvent::Chunked { chunks, tokens } => {
                info!("[{run_id}] split {tokens} tokens into {chunks} chunks");
            }
            PipelineEvent::ChunkSummarized { index, done, total } => {
                debug!("[{run_id}] chunk {index} summarized ({done}/{total})");
            }
            PipelineEvent::ChunkFailed { index, error } => {
                warn!("[{run_id}] chunk {index} failed: {error}");
            }
            PipelineEvent::Failed { error } => warn!("[{run_id}] run failed: {error}"),
            PipelineEvent::Cancelled => info!("[{run_id}] output dropped by consumer"),
        }
    }
}

/// Per-run handle that tracks the current state and forwards events.
#[derive(Clone)]
pub(crate) struct Reporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    run_id: String,
    observer: Arc<dyn PipelineObserver>,
    state: Mutex<PipelineState>,
}

impl Reporter {
    fn new(run_id: String, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                run_id,
                observer,
                state: Mutex::new(PipelineState::Received),
            }),
        }
    }

    pub(crate) fn emit(&self, event: &PipelineEvent<'_>) {
        self.inner.observer.on_event(&self.inner.run_id, event);
    }

    fn transition(&self, to: PipelineState) {
        let from = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, to)
        };
        if from != to {
            self.emit(&PipelineEvent::Transition { from, to });
        }
    }

    fn fail(&self, error: &Error) {
        self.emit(&PipelineEvent::Failed { error });
        self.transition(PipelineState::Failed);
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Summarizes transcripts with one summarizer and one configuration.
pub struct Pipeline {
    summarizer: Arc<dyn Summarizer>,
    config: PipelineConfig,
    chunker: Chunker,
    observer: Arc<dyn PipelineObserver>,
}

impl Pipeline {
    /// Validate `config` and build a pipeline. Invalid settings fail here,
    /// before any work.
    pub fn new(summarizer: Arc<dyn Summarizer>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(config.max_chunk_tokens)?.with_lookback(config.boundary_lookback);
        Ok(Self {
            summarizer,
            config,
            chunker,
            observer: Arc::new(LoggingObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Summarize `transcript`.
    ///
    /// Resolves once the output is ready to stream: after the map phase and
    /// once the reduce call has been accepted, or for [`Strategy::Sections`]
    /// once the first section is released. The returned stream yields the
    /// final summary's tokens in generation order and ends after the last
    /// one, or after a single `Err` if the run fails mid-stream.
    pub async fn run(&self, transcript: &str) -> Result<TokenStream> {
        let run_id = generate_run_id();
        let span = info_span!("pipeline", run = %run_id);
        let reporter = Reporter::new(run_id, Arc::clone(&self.observer));
        let deadline = Instant::now() + self.config.timeout;

        let prepared = tokio::time::timeout_at(deadline, self.prepare(transcript, &reporter))
            .instrument(span)
            .await;

        match prepared {
            Ok(Ok(tokens)) => Ok(Box::pin(stream::unfold(
                Guarded {
                    inner: tokens,
                    deadline,
                    timeout_ms: self.timeout_ms(),
                    reporter,
                    _summarizer: Arc::clone(&self.summarizer),
                    started: false,
                    finished: false,
                },
                next_guarded,
            ))),
            Ok(Err(e)) => {
                reporter.fail(&e);
                Err(e)
            }
            Err(_) => {
                let e = Error::timeout(self.timeout_ms());
                reporter.fail(&e);
                Err(e)
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    async fn prepare(&self, transcript: &str, reporter: &Reporter) -> Result<TokenStream> {
        reporter.transition(PipelineState::Chunking);
        if transcript.trim().is_empty() {
            info!("Empty transcript, nothing to summarize");
            return Ok(Box::pin(stream::empty()));
        }

        let chunks = self.chunker.chunk(transcript);
        reporter.emit(&PipelineEvent::Chunked {
            chunks: chunks.len(),
            tokens: chunks.iter().map(|c| c.token_count).sum(),
        });

        let mapper = MapExecutor::new(Arc::clone(&self.summarizer), self.config.max_concurrency)
            .with_failure_policy(self.config.failure_policy)
            .with_video_id(self.config.video_id.clone())
            .with_reporter(reporter.clone());

        reporter.transition(PipelineState::Mapping);
        match self.config.strategy {
            Strategy::MapReduce => {
                let outcome = mapper.map_summarize(&chunks).await?;
                reporter.transition(PipelineState::Reducing);
                reduce_summarize(&outcome, self.summarizer.as_ref()).await
            }
            Strategy::Sections => {
                // Hold the output until the first section resolves, so an
                // early failure still reaches the caller as `Err`.
                let mut sections = render_sections(mapper.map_ordered_stream(&chunks));
                match sections.next().await {
                    Some(Ok(first)) => Ok(Box::pin(stream::iter([Ok(first)]).chain(sections))),
                    Some(Err(e)) => Err(e),
                    None => Ok(Box::pin(stream::empty())),
                }
            }
        }
    }
}

/// One markdown block per released section.
fn render_sections(sections: SectionStream) -> TokenStream {
    Box::pin(sections.map(|section| {
        section.map(|section| match section {
            Section::Summarized(summary) => format!("{}\n\n", summary.text.trim()),
            Section::Missing { index } => format!("{}\n\n", missing_section_note(index)),
        })
    }))
}

// ── Output guard ───────────────────────────────────────────────────

/// Enforces the remaining deadline on the output and reports its lifecycle.
struct Guarded {
    inner: TokenStream,
    deadline: Instant,
    timeout_ms: u64,
    reporter: Reporter,
    // Outlives the pipeline so per-request usage covers the reduce call.
    _summarizer: Arc<dyn Summarizer>,
    started: bool,
    finished: bool,
}

impl Guarded {
    fn fail(&mut self, error: &Error) {
        self.finished = true;
        // Release the upstream call right away.
        self.inner = Box::pin(stream::empty());
        self.reporter.fail(error);
    }
}

impl Drop for Guarded {
    fn drop(&mut self) {
        if !self.finished {
            self.reporter.emit(&PipelineEvent::Cancelled);
            self.reporter.transition(PipelineState::Failed);
        }
    }
}

async fn next_guarded(mut g: Guarded) -> Option<(Result<String>, Guarded)> {
    if g.finished {
        return None;
    }
    match tokio::time::timeout_at(g.deadline, g.inner.next()).await {
        Ok(Some(Ok(token))) => {
            if !g.started {
                g.started = true;
                g.reporter.transition(PipelineState::Streaming);
            }
            Some((Ok(token), g))
        }
        Ok(Some(Err(e))) => {
            g.fail(&e);
            Some((Err(e), g))
        }
        Ok(None) => {
            g.finished = true;
            // An empty summary still passes through Streaming.
            g.reporter.transition(PipelineState::Streaming);
            g.reporter.transition(PipelineState::Completed);
            None
        }
        Err(_) => {
            let e = Error::timeout(g.timeout_ms);
            g.fail(&e);
            Some((Err(e), g))
        }
    }
}
