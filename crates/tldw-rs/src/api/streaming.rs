//! Server-Sent Events (SSE) streaming for the OpenRouter chat completions API.
//!
//! [`OpenRouterClient::chat_stream`] opens a streaming completion and returns
//! a lazy [`TokenStream`] of text deltas. The body is read incrementally with
//! `Response::chunk()`, so the first token reaches the caller as soon as it
//! comes off the wire. Dropping the stream drops the response and closes the
//! connection, which is how callers cancel a call mid-generation.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::api::tracing::CostTracker;
use crate::error::{Error, Result, Stage};
use crate::summarizer::TokenStream;
use crate::{ChatRequest, OpenRouterClient, UsageInfo};

/// A single parsed event from an SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// Token usage information (sent in the final chunk).
    Usage(UsageInfo),
    /// The upstream reported an error inside the stream.
    Error(String),
    /// The stream is complete.
    Done,
    /// The body ended before `[DONE]` or a finish reason arrived.
    Truncated,
}

/// Raw SSE data chunk from the OpenRouter API.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
    error: Option<StreamError>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamError {
    message: String,
}

/// Incremental line splitter over raw body bytes.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks are decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
    finish_seen: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of body bytes, appending any complete events to `out`.
    pub fn feed(&mut self, bytes: &[u8], out: &mut VecDeque<SseEvent>) {
        self.buffer.extend_from_slice(bytes);
        while !self.done
            && let Some(pos) = self.buffer.iter().position(|&b| b == b'\n')
        {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&String::from_utf8_lossy(&line), out);
        }
    }

    /// Flush an unterminated final line once the body has ended.
    pub fn finish(&mut self, out: &mut VecDeque<SseEvent>) {
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&String::from_utf8_lossy(&line), out);
        }
        if !self.done {
            self.done = true;
            if self.finish_seen {
                out.push_back(SseEvent::Done);
            } else {
                warn!("Stream body ended before [DONE]");
                out.push_back(SseEvent::Truncated);
            }
        }
    }

    /// Whether the `[DONE]` sentinel (or end of body) has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn process_line(&mut self, line: &str, out: &mut VecDeque<SseEvent>) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        if line == "data: [DONE]" {
            self.done = true;
            out.push_back(SseEvent::Done);
            return;
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.finish_seen |= parse_sse_data(data.trim_start(), out);
        }
    }
}

/// Parse a single SSE `data:` payload into stream events. Returns whether
/// the payload carried a finish reason.
fn parse_sse_data(data: &str, out: &mut VecDeque<SseEvent>) -> bool {
    let mut finished = false;
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                out.push_back(SseEvent::Error(err.message));
                return false;
            }

            if let Some(usage) = chunk.usage {
                out.push_back(SseEvent::Usage(usage));
            }

            for choice in chunk.choices.unwrap_or_default() {
                if let Some(content) = choice.delta.and_then(|d| d.content)
                    && !content.is_empty()
                {
                    out.push_back(SseEvent::TextDelta(content));
                }
                if choice.finish_reason.is_some() {
                    trace!("Stream finish_reason: {:?}", choice.finish_reason);
                    finished = true;
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} - data: {data}");
        }
    }
    finished
}

/// Live state of one streaming call.
struct StreamState {
    resp: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    costs: Option<(Arc<CostTracker>, String)>,
    finished: bool,
}

impl OpenRouterClient {
    /// Open a streaming chat completion authorized by `api_key`.
    ///
    /// Resolves once the response headers arrive. HTTP 401/403 fail with
    /// [`Error::Unauthorized`]; any other non-success status fails with
    /// [`Error::SummarizerCallFailed`]. The returned stream yields text
    /// deltas in arrival order and ends at `[DONE]` or end of body.
    pub async fn chat_stream(
        &self,
        body: &ChatRequest,
        api_key: &str,
        costs: Option<Arc<CostTracker>>,
    ) -> Result<TokenStream> {
        let mut stream_body = serde_json::to_value(body)?;
        stream_body["stream"] = serde_json::Value::Bool(true);

        debug!(
            "Sending streaming chat request: model={}, messages={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
        );

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&stream_body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::unauthorized(format!("OpenRouter API HTTP {status}: {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::summarizer(
                Stage::Reduce,
                format!("OpenRouter API HTTP {status}: {text}"),
            ));
        }

        let state = StreamState {
            resp,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            costs: costs.map(|c| (c, body.model.clone())),
            finished: false,
        };

        Ok(Box::pin(stream::unfold(state, next_token)))
    }
}

/// Drive the response until the next text delta, error, or end of stream.
async fn next_token(mut st: StreamState) -> Option<(Result<String>, StreamState)> {
    loop {
        if let Some(event) = st.pending.pop_front() {
            match event {
                SseEvent::TextDelta(text) => return Some((Ok(text), st)),
                SseEvent::Usage(usage) => {
                    debug!(
                        "Token usage: prompt={}, completion={}",
                        usage.prompt_tokens.unwrap_or(0),
                        usage.completion_tokens.unwrap_or(0),
                    );
                    if let Some((tracker, model)) = &st.costs {
                        tracker.record(model, &usage);
                    }
                }
                SseEvent::Error(message) => {
                    st.finished = true;
                    st.pending.clear();
                    let err = Error::summarizer(Stage::Reduce, format!("stream error: {message}"));
                    return Some((Err(err), st));
                }
                SseEvent::Done => {
                    st.finished = true;
                    st.pending.clear();
                }
                SseEvent::Truncated => {
                    st.finished = true;
                    st.pending.clear();
                    let err = Error::summarizer(Stage::Reduce, "stream ended before [DONE]");
                    return Some((Err(err), st));
                }
            }
            continue;
        }

        if st.finished {
            debug!("Stream completed");
            return None;
        }

        match st.resp.chunk().await {
            Ok(Some(bytes)) => st.decoder.feed(&bytes, &mut st.pending),
            Ok(None) => st.decoder.finish(&mut st.pending),
            Err(e) => {
                st.finished = true;
                let err = Error::summarizer(
                    Stage::Reduce,
                    format!("failed to read streaming chunk: {e}"),
                );
                return Some((Err(err), st));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(body: &[&[u8]]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        let mut out = VecDeque::new();
        for part in body {
            decoder.feed(part, &mut out);
        }
        decoder.finish(&mut out);
        out.into_iter().collect()
    }

    #[test]
    fn decodes_text_deltas_and_done() {
        let events = decode(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            b"data: [DONE]\n\n",
        ]);
        assert_eq!(
            events,
            vec![
                SseEvent::TextDelta("Hel".into()),
                SseEvent::TextDelta("lo".into()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn lines_split_across_chunks_are_joined() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let events = decode(&[&line[..split], &line[split..]]);
        assert_eq!(events[0], SseEvent::TextDelta("caf\u{e9}".into()));
    }

    #[test]
    fn comments_and_empty_deltas_are_skipped() {
        let events = decode(&[
            b": OPENROUTER PROCESSING\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            b"data: [DONE]\n",
        ]);
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn usage_and_errors_are_surfaced() {
        let events = decode(&[
            b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":4,\"total_tokens\":14}}\n",
            b"data: {\"error\":{\"message\":\"provider overloaded\"}}\n",
        ]);
        assert!(matches!(events[0], SseEvent::Usage(ref u) if u.prompt_tokens == Some(10)));
        assert_eq!(events[1], SseEvent::Error("provider overloaded".into()));
    }

    #[test]
    fn nothing_after_done_is_parsed() {
        let events = decode(&[
            b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ]);
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn unterminated_final_line_is_flushed() {
        let events = decode(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"},\"finish_reason\":\"stop\"}]}",
        ]);
        assert_eq!(
            events,
            vec![SseEvent::TextDelta("tail".into()), SseEvent::Done]
        );
    }

    #[test]
    fn body_ending_without_done_is_truncated() {
        let events = decode(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"Half a sent\"}}]}\n\n"]);
        assert_eq!(
            events,
            vec![SseEvent::TextDelta("Half a sent".into()), SseEvent::Truncated]
        );
    }

    #[test]
    fn finish_reason_without_done_is_a_clean_end() {
        let events = decode(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        ]);
        assert_eq!(events, vec![SseEvent::TextDelta("ok".into()), SseEvent::Done]);
    }
}
