//! The combining phase: one streaming call over every chunk summary.

use futures::{StreamExt, stream};
use tracing::{debug, info};

use crate::chunker::tokenize;
use crate::error::{Result, Stage};
use crate::map::MapOutcome;
use crate::prompt::{SUMMARY_SEPARATOR, missing_section_note, reduce_prompt};
use crate::summarizer::{Summarizer, TokenStream};

/// Join the summaries in chunk order, marking failed chunks.
pub fn combine_summaries(outcome: &MapOutcome) -> String {
    let mut summaries = outcome.summaries.iter().peekable();
    let mut parts = Vec::with_capacity(outcome.total);
    for index in 0..outcome.total {
        match summaries.next_if(|s| s.index == index) {
            Some(summary) => parts.push(summary.text.trim().to_string()),
            None => parts.push(missing_section_note(index)),
        }
    }
    parts.join(SUMMARY_SEPARATOR)
}

/// Stream the final summary for a completed map phase.
///
/// A lone summary with no gaps is already the final answer, so it is
/// re-streamed without a second call. No summaries yields an empty stream.
pub async fn reduce_summarize(outcome: &MapOutcome, summarizer: &dyn Summarizer) -> Result<TokenStream> {
    if outcome.summaries.is_empty() {
        debug!("Reduce: nothing to combine");
        return Ok(Box::pin(stream::empty()));
    }

    if outcome.summaries.len() == 1 && outcome.is_complete() {
        debug!("Reduce: single chunk, re-streaming its summary");
        let tokens = tokenize(&outcome.summaries[0].text);
        return Ok(Box::pin(stream::iter(tokens.into_iter().map(Ok))));
    }

    let combined = combine_summaries(outcome);
    info!(
        "Reduce: combining {} summaries ({} missing, {} chars)",
        outcome.summaries.len(),
        outcome.gaps.len(),
        combined.len()
    );

    let tokens = summarizer
        .summarize(reduce_prompt(combined))
        .await
        .map_err(|e| e.at_stage(Stage::Reduce))?;
    Ok(Box::pin(
        tokens.map(|token| token.map_err(|e| e.at_stage(Stage::Reduce))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::map::ChunkSummary;
    use crate::summarizer::PromptKind;
    use crate::testing::ScriptedSummarizer;
    use futures::TryStreamExt;
    use std::sync::atomic::Ordering;

    fn outcome(texts: &[(usize, &str)], total: usize) -> MapOutcome {
        let summaries: Vec<ChunkSummary> = texts
            .iter()
            .map(|(index, text)| ChunkSummary {
                index: *index,
                text: (*text).into(),
            })
            .collect();
        let gaps = (0..total)
            .filter(|i| !summaries.iter().any(|s| s.index == *i))
            .collect();
        MapOutcome {
            summaries,
            gaps,
            total,
        }
    }

    #[test]
    fn combine_keeps_order_and_marks_gaps() {
        let combined = combine_summaries(&outcome(&[(0, "first\n"), (2, " third")], 3));
        assert_eq!(
            combined,
            format!(
                "first{SUMMARY_SEPARATOR}{}{SUMMARY_SEPARATOR}third",
                missing_section_note(1)
            )
        );
    }

    #[tokio::test]
    async fn single_summary_skips_the_reduce_call() {
        let summarizer = ScriptedSummarizer::new();
        let text: String = reduce_summarize(&outcome(&[(0, "Only chunk. Done.")], 1), &summarizer)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(text, "Only chunk. Done.");
        assert_eq!(summarizer.stats().reduce_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn many_summaries_make_one_call() {
        let summarizer = ScriptedSummarizer::new();
        let text: String = reduce_summarize(&outcome(&[(0, "a"), (1, "b")], 2), &summarizer)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(text, "Final summary");
        assert_eq!(summarizer.stats().reduce_calls.load(Ordering::SeqCst), 1);

        let prompt = summarizer.prompts().pop().unwrap();
        assert_eq!(prompt.kind, PromptKind::Reduce);
        assert_eq!(prompt.content, format!("a{SUMMARY_SEPARATOR}b"));
    }

    #[tokio::test]
    async fn lone_summary_with_gaps_still_reduces() {
        let summarizer = ScriptedSummarizer::new();
        reduce_summarize(&outcome(&[(1, "b")], 2), &summarizer)
            .await
            .unwrap();
        assert_eq!(summarizer.stats().reduce_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_outcome_is_an_empty_stream() {
        let summarizer = ScriptedSummarizer::new();
        let tokens: Vec<String> = reduce_summarize(&MapOutcome::default(), &summarizer)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn failures_are_tagged_as_reduce() {
        let summarizer = ScriptedSummarizer::new().failing_reduce();
        let err = reduce_summarize(&outcome(&[(0, "a"), (1, "b")], 2), &summarizer)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::SummarizerCallFailed {
                stage: Stage::Reduce,
                ..
            }
        ));
    }
}
