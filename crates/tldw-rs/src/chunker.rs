//! Lexical tokenizer and greedy, sentence-aware chunker.
//!
//! Tokens are word runs or single punctuation marks, each carrying the
//! whitespace that follows it (the first token also carries any leading
//! whitespace). Token spans therefore tile the input exactly, and a chunk is
//! just the text between its first and last token: concatenating every chunk
//! in index order gives back the original text byte for byte.
//!
//! Chunks are closed greedily at `max_tokens`. Before cutting mid-sentence,
//! the chunker looks back over the last `lookback` tokens for a sentence end
//! (`.`, `!`, `?`) and cuts right after it instead.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Word run, or a single punctuation mark, with surrounding whitespace.
/// The trailing `\s+` alternative only matches whitespace-only input.
#[allow(clippy::expect_used)]
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:\w+|[^\w\s])\s*|\s+").expect("valid token regex"));

/// A contiguous, non-overlapping slice of the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position of this chunk in the transcript.
    pub index: usize,
    /// The chunk text, including trailing whitespace.
    pub text: String,
    /// Number of lexical tokens in `text`. Never exceeds the chunker's bound.
    pub token_count: usize,
}

/// Byte ranges of every token in `text`, in order.
pub fn token_spans(text: &str) -> Vec<Range<usize>> {
    TOKEN_REGEX.find_iter(text).map(|m| m.range()).collect()
}

/// Split `text` into its tokens as owned strings.
///
/// Used to re-stream an already complete summary token by token.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_REGEX
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Count the lexical tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    TOKEN_REGEX.find_iter(text).count()
}

fn is_sentence_end(token: &str) -> bool {
    matches!(token.trim_end().chars().last(), Some('.' | '!' | '?'))
}

/// Chunker settings.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_tokens: usize,
    lookback: usize,
}

impl Chunker {
    /// Create a chunker that emits chunks of at most `max_tokens` tokens.
    ///
    /// Fails with [`Error::Configuration`] when `max_tokens` is zero.
    pub fn new(max_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(Error::configuration("max_chunk_tokens must be greater than 0"));
        }
        Ok(Self {
            max_tokens,
            lookback: (max_tokens / 4).max(1),
        })
    }

    /// Set how many trailing tokens are searched for a sentence end before
    /// cutting mid-sentence. `0` disables sentence-aware cutting.
    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// Maximum tokens per chunk.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Split `text` into ordered chunks.
    ///
    /// Empty text yields no chunks. Text with at most `max_tokens` tokens
    /// yields exactly one.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let spans = token_spans(text);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < spans.len() {
            let end = self.cut_point(text, &spans, start);
            let (Some(first), Some(last)) = (spans.get(start), spans.get(end - 1)) else {
                break;
            };
            chunks.push(Chunk {
                index: chunks.len(),
                text: text.get(first.start..last.end).unwrap_or_default().to_string(),
                token_count: end - start,
            });
            start = end;
        }

        chunks
    }

    /// Exclusive token index at which the chunk starting at `start` closes.
    fn cut_point(&self, text: &str, spans: &[Range<usize>], start: usize) -> usize {
        let hard_end = start.saturating_add(self.max_tokens);
        if hard_end >= spans.len() {
            return spans.len();
        }

        let window_start = hard_end.saturating_sub(self.lookback).max(start);
        (window_start..hard_end)
            .rev()
            .find(|&i| {
                spans
                    .get(i)
                    .and_then(|span| text.get(span.clone()))
                    .is_some_and(is_sentence_end)
            })
            .map_or(hard_end, |i| i + 1)
    }
}

/// Split `text` into chunks of at most `max_tokens` tokens using the default
/// lookback window.
pub fn chunk(text: &str, max_tokens: usize) -> Result<Vec<Chunk>> {
    Ok(Chunker::new(max_tokens)?.chunk(text))
}
