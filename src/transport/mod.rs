//! Streaming transport for the chat endpoint
//!
//! [`http::ChatClient`] issues one POST per stream and feeds the response
//! body through [`consume_event_stream`], which decodes `data:` frames and
//! hands them to a [`StreamHandler`] one at a time.
//!
//! # Callback contract
//!
//! - `on_message` is awaited before the next frame is read, so frames are
//!   applied in arrival order.
//! - Exactly one of `on_close` / `on_error` fires for a stream that is not
//!   cancelled. A cancelled stream fires neither.
//! - Cancellation is checked before every read and before every frame.

pub mod http;
pub mod sse;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};
use crate::protocol::{ChatEvent, RawFrame};

pub use http::ChatClient;

/// Receiver of decoded frames for a single stream.
#[async_trait::async_trait]
pub trait StreamHandler: Send {
    /// Apply one frame. `frame` is the envelope as received and `event`
    /// its decoded form. Returning an error terminates the stream and is
    /// reported through [`StreamHandler::on_error`].
    async fn on_message(&mut self, frame: RawFrame, event: ChatEvent) -> Result<()>;

    /// Terminal failure. Called at most once.
    async fn on_error(&mut self, error: ChatError);

    /// Normal end of stream. Called at most once.
    async fn on_close(&mut self);
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Body ended; `on_close` was called.
    Completed,
    /// Token was cancelled; no terminal callback was called.
    Cancelled,
    /// `on_error` was called.
    Failed,
}

/// Handle to a stream running on its own task.
#[derive(Debug)]
pub struct StreamHandle {
    token: CancellationToken,
    task: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<StreamOutcome>) -> Self {
        Self { token, task }
    }

    /// Signal cancellation. Frames not yet delivered are dropped.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Detached closure that cancels this stream.
    pub fn canceller(&self) -> impl Fn() + Send + Sync + 'static {
        let token = self.token.clone();
        move || token.cancel()
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the stream task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream task to exit.
    pub async fn join(self) -> StreamOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Stream task panicked or was aborted: {}", e);
                StreamOutcome::Failed
            }
        }
    }
}

enum Flow {
    Continue,
    Stop(StreamOutcome),
}

/// Drive a response body through the frame decoder and `handler`.
///
/// Undecodable frames are skipped with a warning; `max_parse_errors`
/// consecutive failures abort the stream with
/// [`ChatError::MalformedFrames`].
///
/// # Arguments
///
/// * `body` - Byte chunks of the response body
/// * `handler` - Frame receiver
/// * `token` - Cooperative cancellation signal
/// * `max_parse_errors` - Consecutive parse failures tolerated
pub async fn consume_event_stream<S, E, H>(
    body: S,
    handler: &mut H,
    token: &CancellationToken,
    max_parse_errors: usize,
) -> StreamOutcome
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
    H: StreamHandler + ?Sized,
{
    let mut decoder = sse::SseLineDecoder::default();
    let mut parse_failures = 0usize;

    tokio::pin!(body);

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for line in decoder.push(&chunk) {
                    let flow =
                        deliver_line(&line, handler, token, &mut parse_failures, max_parse_errors)
                            .await;
                    if let Flow::Stop(outcome) = flow {
                        return outcome;
                    }
                }
            }
            Some(Err(e)) => {
                if token.is_cancelled() {
                    return StreamOutcome::Cancelled;
                }
                tracing::error!("Failed to read chat stream: {}", e);
                handler.on_error(ChatError::StreamRead(e.to_string())).await;
                return StreamOutcome::Failed;
            }
            None => break,
        }
    }

    if let Some(line) = decoder.finish() {
        let flow =
            deliver_line(&line, handler, token, &mut parse_failures, max_parse_errors).await;
        if let Flow::Stop(outcome) = flow {
            return outcome;
        }
    }

    if token.is_cancelled() {
        return StreamOutcome::Cancelled;
    }

    tracing::debug!("Chat stream closed");
    handler.on_close().await;
    StreamOutcome::Completed
}

async fn deliver_line<H: StreamHandler + ?Sized>(
    line: &str,
    handler: &mut H,
    token: &CancellationToken,
    parse_failures: &mut usize,
    max_parse_errors: usize,
) -> Flow {
    if token.is_cancelled() {
        return Flow::Stop(StreamOutcome::Cancelled);
    }

    let Some(payload) = sse::frame_payload(line) else {
        return Flow::Continue;
    };
    if payload.is_empty() {
        return Flow::Continue;
    }

    let decoded = RawFrame::parse(payload)
        .and_then(|frame| ChatEvent::try_from(frame.clone()).map(|event| (frame, event)));
    let (frame, event) = match decoded {
        Ok(decoded) => {
            *parse_failures = 0;
            decoded
        }
        Err(e) => {
            *parse_failures += 1;
            tracing::warn!("Skipping malformed frame ({}): {}", parse_failures, e);
            if *parse_failures >= max_parse_errors {
                handler
                    .on_error(ChatError::MalformedFrames {
                        count: *parse_failures,
                    })
                    .await;
                return Flow::Stop(StreamOutcome::Failed);
            }
            return Flow::Continue;
        }
    };

    tracing::debug!("Delivering `{}` frame", event.kind());
    if let Err(e) = handler.on_message(frame, event).await {
        let error = match e.downcast::<ChatError>() {
            Ok(chat_error) => chat_error,
            Err(other) => ChatError::Handler(other.to_string()),
        };
        tracing::error!("Frame handler failed: {}", error);
        handler.on_error(error).await;
        return Flow::Stop(StreamOutcome::Failed);
    }

    Flow::Continue
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingHandler;
    use super::*;

    fn body(chunks: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
        let owned: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.as_bytes().to_vec())))
            .collect();
        futures::stream::iter(owned)
    }

    #[tokio::test]
    async fn test_frames_delivered_in_order_then_close() {
        let mut handler = RecordingHandler::default();
        let token = CancellationToken::new();
        let outcome = consume_event_stream(
            body(&[
                "data: {\"type\":\"text\",\"content\":\"Hel\"}\n\n",
                "data: {\"type\":\"text\",\"content\":\"lo\"}\n\n",
            ]),
            &mut handler,
            &token,
            3,
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(
            handler.events,
            vec![
                ChatEvent::Text("Hel".to_string()),
                ChatEvent::Text("lo".to_string())
            ]
        );
        assert_eq!(handler.closed, 1);
        assert!(handler.errors.is_empty());
    }

    #[tokio::test]
    async fn test_frame_split_across_chunks() {
        let mut handler = RecordingHandler::default();
        let token = CancellationToken::new();
        consume_event_stream(
            body(&["data: {\"type\":\"te", "xt\",\"content\":\"x\"}", "\n\n"]),
            &mut handler,
            &token,
            3,
        )
        .await;
        assert_eq!(handler.events, vec![ChatEvent::Text("x".to_string())]);
    }

    #[tokio::test]
    async fn test_non_data_lines_ignored() {
        let mut handler = RecordingHandler::default();
        let token = CancellationToken::new();
        consume_event_stream(
            body(&[": comment\nevent: message\nid: 7\ndata: {\"type\":\"message_id\",\"content\":\"m1\"}\n\n"]),
            &mut handler,
            &token,
            3,
        )
        .await;
        assert_eq!(handler.events, vec![ChatEvent::MessageId("m1".to_string())]);
    }

    #[tokio::test]
    async fn test_trailing_frame_without_newline_is_delivered() {
        let mut handler = RecordingHandler::default();
        let token = CancellationToken::new();
        consume_event_stream(
            body(&["data: {\"type\":\"text\",\"content\":\"end\"}"]),
            &mut handler,
            &token,
            3,
        )
        .await;
        assert_eq!(handler.events.len(), 1);
        assert_eq!(handler.closed, 1);
    }

    #[tokio::test]
    async fn test_isolated_malformed_frame_is_skipped() {
        let mut handler = RecordingHandler::default();
        let token = CancellationToken::new();
        let outcome = consume_event_stream(
            body(&[
                "data: {broken\n\n",
                "data: {\"type\":\"text\",\"content\":\"ok\"}\n\n",
                "data: also broken\n\n",
                "data: {\"type\":\"text\",\"content\":\"still ok\"}\n\n",
            ]),
            &mut handler,
            &token,
            2,
        )
        .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(handler.events.len(), 2);
        assert!(handler.errors.is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_malformed_frames_abort() {
        let mut handler = RecordingHandler::default();
        let token = CancellationToken::new();
        let outcome = consume_event_stream(
            body(&[
                "data: nope\n\ndata: nope\n\ndata: nope\n\n",
                "data: {\"type\":\"text\",\"content\":\"never\"}\n\n",
            ]),
            &mut handler,
            &token,
            3,
        )
        .await;
        assert_eq!(outcome, StreamOutcome::Failed);
        assert_eq!(handler.errors.len(), 1);
        assert!(handler.errors[0].contains("3 consecutive"));
        assert_eq!(handler.closed, 0);
        assert!(handler.events.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_chunk_stops_delivery_without_callbacks() {
        let token = CancellationToken::new();
        let mut handler = RecordingHandler {
            cancel_after: Some((2, token.clone())),
            ..Default::default()
        };
        let frames: String = (0..5)
            .map(|i| format!("data: {{\"type\":\"text\",\"content\":\"{i}\"}}\n\n"))
            .collect();

        let outcome = consume_event_stream(body(&[frames.as_str()]), &mut handler, &token, 3).await;

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(handler.events.len(), 2);
        assert_eq!(handler.closed, 0);
        assert!(handler.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_malformed_frames_from_failing_the_stream() {
        let token = CancellationToken::new();
        let mut handler = RecordingHandler {
            cancel_after: Some((1, token.clone())),
            ..Default::default()
        };
        let chunk = "data: {\"type\":\"text\",\"content\":\"a\"}\n\n\
                     data: bad\n\ndata: bad\n\ndata: bad\n\n";

        let outcome = consume_event_stream(body(&[chunk]), &mut handler, &token, 3).await;

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(handler.events, vec![ChatEvent::Text("a".to_string())]);
        assert!(handler.errors.is_empty());
        assert_eq!(handler.closed, 0);
    }

    #[tokio::test]
    async fn test_handler_receives_frame_as_sent() {
        let mut handler = RecordingHandler::default();
        let token = CancellationToken::new();
        consume_event_stream(
            body(&[
                "data: {\"type\":\"task\",\"content\":{\"id\":\"t1\",\"title\":\"Read\"}}\n\n",
                "data: {\"type\":\"error\",\"content\":\"boom\"}\n\n",
            ]),
            &mut handler,
            &token,
            3,
        )
        .await;

        assert_eq!(handler.frames.len(), 2);
        assert_eq!(handler.frames[0].kind, "task");
        assert_eq!(handler.frames[1].kind, "error");
        assert_eq!(handler.frames[1].content, serde_json::json!("boom"));
        assert_eq!(handler.events[1], ChatEvent::Error("boom".to_string()));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_reads_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let mut handler = RecordingHandler::default();
        let outcome = consume_event_stream(
            body(&["data: {\"type\":\"text\",\"content\":\"x\"}\n\n"]),
            &mut handler,
            &token,
            3,
        )
        .await;
        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(handler.events.is_empty());
        assert_eq!(handler.closed, 0);
    }

    #[tokio::test]
    async fn test_read_error_reported_once() {
        let token = CancellationToken::new();
        let mut handler = RecordingHandler::default();
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"text\",\"content\":\"a\"}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"data: {\"type\":\"text\",\"content\":\"b\"}\n\n")),
        ];
        let outcome =
            consume_event_stream(futures::stream::iter(chunks), &mut handler, &token, 3).await;
        assert_eq!(outcome, StreamOutcome::Failed);
        assert_eq!(handler.events.len(), 1);
        assert_eq!(handler.errors.len(), 1);
        assert!(handler.errors[0].contains("reset"));
        assert_eq!(handler.closed, 0);
    }

    #[tokio::test]
    async fn test_handler_error_terminates_stream() {
        let token = CancellationToken::new();
        let mut handler = RecordingHandler {
            fail_on: Some("image".to_string()),
            ..Default::default()
        };
        let outcome = consume_event_stream(
            body(&[
                "data: {\"type\":\"image\",\"content\":{\"id\":\"i\",\"url\":\"u\"}}\n\n",
                "data: {\"type\":\"text\",\"content\":\"after\"}\n\n",
            ]),
            &mut handler,
            &token,
            3,
        )
        .await;
        assert_eq!(outcome, StreamOutcome::Failed);
        assert!(handler.events.is_empty());
        assert_eq!(handler.errors, vec!["Chunk reassembly error: rejected"]);
    }
}
