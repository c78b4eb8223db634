//! Plumbing shared by the HTTP backends.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};

use crate::context::RequestContext;
use crate::error::{ModelError, Result};
use crate::types::{ChatStream, StreamEvent, StreamSender, Usage, stream_channel};

/// Build a reqwest client with a per-request timeout.
pub(crate) fn client(backend: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ModelError::Config(format!("failed to build {backend} HTTP client: {e}")))
}

pub(crate) fn transport_error(backend: &str, err: reqwest::Error) -> ModelError {
    ModelError::Request { backend: backend.to_string(), message: err.to_string() }
}

pub(crate) fn parse_error(backend: &str, message: impl std::fmt::Display) -> ModelError {
    ModelError::Parse { backend: backend.to_string(), message: message.to_string() }
}

/// Send a request and turn a non-success status into [`ModelError::Api`].
pub(crate) async fn send(backend: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request.send().await.map_err(|e| transport_error(backend, e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ModelError::Api {
        backend: backend.to_string(),
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Decode a successful JSON response body.
pub(crate) async fn json<T: serde::de::DeserializeOwned>(
    backend: &str,
    response: reqwest::Response,
) -> Result<T> {
    let body = response.bytes().await.map_err(|e| transport_error(backend, e))?;
    serde_json::from_slice(&body).map_err(|e| parse_error(backend, e))
}

/// Pull the human-readable message out of the error bodies the supported
/// APIs return: `{"error": {"message": ..}}` or `{"error": ".."}`.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        let error = value.get("error")?;
        error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .map(str::to_string)
    });
    message.unwrap_or_else(|| body.chars().take(500).collect())
}

/// Splits an NDJSON byte stream into lines. Partial lines are held until
/// their newline arrives.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and return every completed, non-blank line.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    /// The unterminated trailing line, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!text.is_empty()).then_some(text)
    }
}

/// What one SSE event payload or NDJSON line means.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    /// Nothing to emit (keep-alives, bookkeeping events).
    Skip,
    /// A text fragment.
    Delta(String),
    /// Token counts. Zero fields leave earlier counts in place.
    Usage(Usage),
    /// A text fragment that also carries token counts.
    DeltaWithUsage(String, Usage),
    /// End of the completion.
    Done,
    /// The backend reported an error mid-stream.
    Error(String),
}

fn merge_usage(current: &mut Usage, update: Usage) {
    if update.input_tokens > 0 {
        current.input_tokens = update.input_tokens;
    }
    if update.output_tokens > 0 {
        current.output_tokens = update.output_tokens;
    }
    current.total_tokens = current.input_tokens.saturating_add(current.output_tokens);
}

/// Returns `false` once the stream has ended or the consumer went away.
async fn dispatch(frame: Frame, tx: &StreamSender, usage: &mut Usage) -> bool {
    match frame {
        Frame::Skip => true,
        Frame::Usage(update) => {
            merge_usage(usage, update);
            true
        }
        Frame::Delta(text) => tx.send(StreamEvent::Delta(text)).await.is_ok(),
        Frame::DeltaWithUsage(text, update) => {
            merge_usage(usage, update);
            tx.send(StreamEvent::Delta(text)).await.is_ok()
        }
        Frame::Done => {
            let _ = tx.send(StreamEvent::Done { usage: *usage }).await;
            false
        }
        Frame::Error(message) => {
            let _ = tx.send(StreamEvent::Error(message)).await;
            false
        }
    }
}

enum Next<T> {
    Item(T),
    End,
    Stop,
}

/// Pull the next item from `source`. On cancellation or a transport error a
/// terminal error event is sent and the caller must stop.
async fn next_item<S, T, E>(ctx: &RequestContext, source: &mut S, tx: &StreamSender) -> Next<T>
where
    S: Stream<Item = std::result::Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    match ctx.run(source.next()).await {
        Err(interrupted) => {
            let _ = tx.send(StreamEvent::Error(ModelError::from(interrupted).to_string())).await;
            Next::Stop
        }
        Ok(None) => Next::End,
        Ok(Some(Err(e))) => {
            let _ = tx.send(StreamEvent::Error(e.to_string())).await;
            Next::Stop
        }
        Ok(Some(Ok(item))) => Next::Item(item),
    }
}

/// Decode a Server-Sent Events body on a dedicated task, feeding each
/// event's data through `parse`.
///
/// The task owns the sender, so the channel closes when the task ends. It
/// stops early when the consumer drops the stream, and emits a terminal
/// error event if the context is cancelled or the connection fails. A
/// response that ends without an explicit end marker still gets a `Done`.
pub(crate) fn spawn_sse_stream<S, B, E, P>(ctx: &RequestContext, bytes: S, mut parse: P) -> ChatStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + 'static,
    P: FnMut(&str) -> Frame + Send + 'static,
{
    let (tx, stream) = stream_channel();
    let ctx = ctx.clone();

    tokio::spawn(async move {
        let mut events = Box::pin(bytes.eventsource());
        let mut usage = Usage::default();

        loop {
            match next_item(&ctx, &mut events, &tx).await {
                Next::Item(event) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    if !dispatch(parse(&event.data), &tx, &mut usage).await {
                        return;
                    }
                }
                Next::End => break,
                Next::Stop => return,
            }
        }
        let _ = tx.send(StreamEvent::Done { usage }).await;
    });

    stream
}

/// Like [`spawn_sse_stream`], for newline-delimited JSON bodies.
pub(crate) fn spawn_ndjson_stream<S, B, E, P>(ctx: &RequestContext, bytes: S, mut parse: P) -> ChatStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    P: FnMut(&str) -> Frame + Send + 'static,
{
    let (tx, stream) = stream_channel();
    let ctx = ctx.clone();

    tokio::spawn(async move {
        let mut bytes = Box::pin(bytes);
        let mut lines = LineBuffer::default();
        let mut usage = Usage::default();

        loop {
            match next_item(&ctx, &mut bytes, &tx).await {
                Next::Item(chunk) => {
                    for line in lines.push(chunk.as_ref()) {
                        if !dispatch(parse(&line), &tx, &mut usage).await {
                            return;
                        }
                    }
                }
                Next::End => break,
                Next::Stop => return,
            }
        }

        if let Some(line) = lines.finish() {
            if !dispatch(parse(&line), &tx, &mut usage).await {
                return;
            }
        }
        let _ = tx.send(StreamEvent::Done { usage }).await;
    });

    stream
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"a\"").is_empty());
        assert_eq!(buffer.push(b": 1}\r\n\r\n{\"do"), vec!["{\"a\": 1}".to_string()]);
        assert_eq!(buffer.push(b"ne\": true}\n"), vec!["{\"done\": true}".to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_flushes_trailing_line() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"done\": true}").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("{\"done\": true}"));
    }

    #[test]
    fn extracts_api_error_messages() {
        assert_eq!(error_message(r#"{"error": {"message": "bad key"}}"#), "bad key");
        assert_eq!(error_message(r#"{"error": "model not found"}"#), "model not found");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn usage_total_saturates() {
        let mut usage = Usage::new(u32::MAX, 0);
        merge_usage(&mut usage, Usage::new(0, 10));
        assert_eq!(usage.total_tokens, u32::MAX);
        assert_eq!(Usage::new(u32::MAX, 1).total_tokens, u32::MAX);
    }

    #[test]
    fn usage_merge_keeps_earlier_counts() {
        let mut usage = Usage::new(12, 0);
        merge_usage(&mut usage, Usage::new(0, 30));
        assert_eq!(usage, Usage::new(12, 30));
    }

    /// A response body delivered in the given pieces.
    fn chunks(
        parts: &[&str],
    ) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + Send + 'static {
        let parts: Vec<_> =
            parts.iter().map(|part| Ok::<_, std::io::Error>(part.as_bytes().to_vec())).collect();
        futures::stream::iter(parts)
    }

    fn echo(data: &str) -> Frame {
        match data {
            "[DONE]" => Frame::Done,
            other => Frame::Delta(other.to_string()),
        }
    }

    #[tokio::test]
    async fn sse_joins_multi_line_data() {
        let ctx = RequestContext::new(uuid::Uuid::new_v4());
        let body = chunks(&["data: {\"a\":\n", "data: 1}\n\n: keep-alive\n\n", "data: [DONE]\n\n"]);

        let events: Vec<StreamEvent> = spawn_sse_stream(&ctx, body, echo).collect().await;

        assert_eq!(
            events,
            vec![StreamEvent::Delta("{\"a\":\n1}".to_string()), StreamEvent::Done { usage: Usage::default() }]
        );
    }

    #[tokio::test]
    async fn sse_accepts_crlf_and_split_events() {
        let ctx = RequestContext::new(uuid::Uuid::new_v4());
        let body = chunks(&["event: message\r\ndata: Hel", "lo\r\n\r\n"]);

        let events: Vec<StreamEvent> = spawn_sse_stream(&ctx, body, echo).collect().await;

        assert_eq!(
            events,
            vec![StreamEvent::Delta("Hello".to_string()), StreamEvent::Done { usage: Usage::default() }]
        );
    }

    #[tokio::test]
    async fn ndjson_flushes_unterminated_last_line() {
        let ctx = RequestContext::new(uuid::Uuid::new_v4());
        let body = chunks(&["one\ntw", "o"]);

        let events: Vec<StreamEvent> = spawn_ndjson_stream(&ctx, body, echo).collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("one".to_string()),
                StreamEvent::Delta("two".to_string()),
                StreamEvent::Done { usage: Usage::default() },
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_stream_ends_with_an_error() {
        let ctx = RequestContext::new(uuid::Uuid::new_v4());
        ctx.cancel();

        let events: Vec<StreamEvent> = spawn_sse_stream(&ctx, chunks(&["data: hi\n\n"]), echo).collect().await;

        assert!(matches!(events.as_slice(), [StreamEvent::Error(_)]));
    }
}
