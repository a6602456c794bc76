//! Output framing for a finished pipeline's token stream.
//!
//! Two wire formats:
//!
//! - **Raw**: tokens are written as-is, back to back. A failure appends one
//!   `[error] ...` line and ends the body.
//! - **Event**: each token becomes one server-sent event
//!   `data: {"text": "..."}`. A successful run ends with exactly one
//!   `data: [DONE]` frame after every data frame. A failed run ends with an
//!   `event: error` frame instead, so a missing `[DONE]` always means the
//!   output is incomplete.
//!
//! Neither framing buffers: each token is framed and handed on as soon as
//! it arrives.

use std::pin::Pin;

use futures::{Stream, StreamExt, stream};
use serde_json::json;

use crate::error::{Error, Result};
use crate::summarizer::TokenStream;

/// Literal payload of the terminal event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Wire framing for a response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    #[default]
    Raw,
    Event,
}

impl Framing {
    pub fn from_sse_flag(use_sse: bool) -> Self {
        if use_sse { Self::Event } else { Self::Raw }
    }

    /// `Content-Type` for a body in this framing.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Raw => "text/plain; charset=utf-8",
            Self::Event => "text/event-stream",
        }
    }
}

/// Transport-level wrapper around a token, or the terminal sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(String),
    Done,
}

impl StreamEvent {
    /// Render as one server-sent event frame.
    pub fn to_sse(&self) -> String {
        match self {
            Self::Data(text) => format!("data: {}\n\n", json!({ "text": text })),
            Self::Done => format!("data: {DONE_SENTINEL}\n\n"),
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Framed output chunks, ready to write.
pub type FrameStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Wrap each token as [`StreamEvent::Data`], then [`StreamEvent::Done`] once
/// the tokens end cleanly. Stops after the first error with no `Done`.
pub fn event_stream(tokens: TokenStream) -> EventStream {
    Box::pin(stream::unfold(Some(tokens), |state| async move {
        let mut tokens = state?;
        match tokens.next().await {
            Some(Ok(token)) => Some((Ok(StreamEvent::Data(token)), Some(tokens))),
            Some(Err(e)) => Some((Err(e), None)),
            None => Some((Ok(StreamEvent::Done), None)),
        }
    }))
}

/// Pass tokens through unchanged, stopping after the first error.
pub fn raw_stream(tokens: TokenStream) -> TokenStream {
    Box::pin(stream::unfold(Some(tokens), |state| async move {
        let mut tokens = state?;
        match tokens.next().await? {
            Ok(token) => Some((Ok(token), Some(tokens))),
            Err(e) => Some((Err(e), None)),
        }
    }))
}

/// Event frame reporting a mid-stream failure.
pub fn sse_error_frame(error: &Error) -> String {
    format!(
        "event: error\ndata: {}\n\n",
        json!({ "error": error.to_string(), "kind": error.kind() })
    )
}

/// Inline line reporting a mid-stream failure in a raw body.
pub fn raw_error_line(error: &Error) -> String {
    format!("\n[error] {error}\n")
}

/// Frame `tokens` for the wire. Failures become in-band error frames.
pub fn frame(tokens: TokenStream, framing: Framing) -> FrameStream {
    match framing {
        Framing::Raw => Box::pin(raw_stream(tokens).map(|item| match item {
            Ok(token) => token,
            Err(e) => raw_error_line(&e),
        })),
        Framing::Event => Box::pin(event_stream(tokens).map(|item| match item {
            Ok(event) => event.to_sse(),
            Err(e) => sse_error_frame(&e),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    fn tokens(items: Vec<Result<String>>) -> TokenStream {
        Box::pin(stream::iter(items))
    }

    fn ok(parts: &[&str]) -> Vec<Result<String>> {
        parts.iter().map(|p| Ok((*p).to_string())).collect()
    }

    #[tokio::test]
    async fn done_is_last_and_appears_once() {
        let events: Vec<StreamEvent> = event_stream(tokens(ok(&["a", "b"])))
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            [
                StreamEvent::Data("a".into()),
                StreamEvent::Data("b".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn empty_output_is_just_the_sentinel() {
        let frames: Vec<String> = frame(tokens(vec![]), Framing::Event).collect().await;
        assert_eq!(frames, ["data: [DONE]\n\n"]);
        let raw: Vec<String> = frame(tokens(vec![]), Framing::Raw).collect().await;
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn failure_suppresses_the_sentinel() {
        let mut items = ok(&["a"]);
        items.push(Err(Error::summarizer(Stage::Reduce, "stream error: gone")));
        items.push(Ok("never".into()));

        let frames: Vec<String> = frame(tokens(items), Framing::Event).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], "data: {\"text\":\"a\"}\n\n");
        assert!(frames[1].starts_with("event: error\ndata: {"));
        assert!(frames[1].contains("summarizer_call_failed"));
        assert!(frames.iter().all(|f| !f.contains(DONE_SENTINEL)));
    }

    #[tokio::test]
    async fn raw_passes_tokens_through() {
        let body: String = frame(tokens(ok(&["# Title", "\n", "- point"])), Framing::Raw)
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(body, "# Title\n- point");
    }

    #[tokio::test]
    async fn raw_failure_appends_error_line() {
        let mut items = ok(&["partial"]);
        items.push(Err(Error::timeout(1000)));
        items.push(Ok("never".into()));
        let body: String = frame(tokens(items), Framing::Raw)
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(body, "partial\n[error] pipeline timed out after 1000ms\n");
    }

    #[test]
    fn data_frames_stay_on_one_line() {
        let frame = StreamEvent::Data("line one\nline two".into()).to_sse();
        assert_eq!(frame, "data: {\"text\":\"line one\\nline two\"}\n\n");
    }

    #[test]
    fn content_types() {
        assert_eq!(Framing::from_sse_flag(true), Framing::Event);
        assert_eq!(Framing::Event.content_type(), "text/event-stream");
        assert_eq!(Framing::from_sse_flag(false).content_type(), "text/plain; charset=utf-8");
    }
}
