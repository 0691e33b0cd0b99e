//! StreamSession - one in-flight request from open to end of body
//!
//! The session issues the request, feeds every chunk through the decoder and
//! the assembler, and hands each new message value to a [`SessionObserver`].
//! It never touches the conversation tree itself.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chat_core::{Message, StreamProtocol};
use chat_state::{StateMachine, StreamEvent, StreamStatus};
use context_manager::{MessageAssembler, StepSummary};
use futures::StreamExt;
use stream_protocol::{DecodeError, ProtocolEvent, StreamDecoder};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::{ByteStream, ChatRequest, ChatTransport};

/// What the session streams into.
#[derive(Debug, Clone)]
pub enum SessionTarget {
    /// A fresh assistant message under `parent_id`.
    Reply {
        parent_id: Option<String>,
        model: Option<String>,
    },
    /// Append to an existing assistant message.
    Continue { message: Message },
}

#[derive(Debug)]
pub enum SessionEnd {
    Finished,
    /// Cancelled by the caller. Not an error.
    Aborted,
    Failed(TransportError),
    /// The server sent an `error` event.
    ServerError(String),
}

#[derive(Debug)]
pub struct SessionOutcome {
    /// Final message value; `None` if nothing was streamed into a fresh reply.
    pub message: Option<Message>,
    pub end: SessionEnd,
    pub steps: StepSummary,
}

/// Callbacks for the owner of the session.
#[async_trait]
pub trait SessionObserver: Send {
    async fn on_status(&mut self, _status: &StreamStatus) {}

    /// A new value of the streamed message.
    async fn on_message(&mut self, message: &Message);

    async fn on_decode_error(&mut self, _error: &DecodeError) {}

    /// Whether a `messageId` announced by the server may name the fresh reply.
    fn accepts_id(&self, _id: &str) -> bool {
        true
    }
}

enum NextChunk {
    Chunk(Bytes),
    /// Read during the abort grace period; applied, then the session stops.
    Last(Bytes),
    End,
    Cancelled,
    Failed(TransportError),
}

pub struct StreamSession {
    decoder: StreamDecoder,
    assembler: MessageAssembler,
    message: Message,
    /// The message has been handed to the observer at least once.
    announced: bool,
    fresh: bool,
    abort_grace: Duration,
    machine: StateMachine,
}

impl StreamSession {
    pub fn new(protocol: StreamProtocol, target: SessionTarget) -> Self {
        let (message, assembler, fresh) = match target {
            SessionTarget::Reply { parent_id, model } => (
                Message::assistant(model).with_parent(parent_id),
                MessageAssembler::new(),
                true,
            ),
            SessionTarget::Continue { message } => {
                let assembler = MessageAssembler::resume(&message);
                (message, assembler, false)
            }
        };
        Self {
            decoder: StreamDecoder::new(protocol),
            assembler,
            message,
            announced: !fresh,
            fresh,
            abort_grace: Duration::ZERO,
            machine: StateMachine::new(),
        }
    }

    /// How long to wait for an in-flight chunk after cancellation.
    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    /// Start from the caller's current status (e.g. a previous error).
    pub fn with_status(mut self, status: StreamStatus) -> Self {
        self.machine = StateMachine::with_state(status);
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message.id
    }

    /// Drive the request to its end. Transport and server errors are
    /// reported in the outcome; the partial message is always returned.
    pub async fn run<O>(
        mut self,
        transport: &dyn ChatTransport,
        request: ChatRequest,
        cancel: CancellationToken,
        observer: &mut O,
    ) -> SessionOutcome
    where
        O: SessionObserver + ?Sized,
    {
        self.transition(StreamEvent::RequestSubmitted, observer).await;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            opened = transport.open(request, cancel.clone()) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(TransportError::Cancelled) => {
                return self.finish(SessionEnd::Aborted, observer).await;
            }
            Err(e) => return self.finish(SessionEnd::Failed(e), observer).await,
        };

        let end = loop {
            let (chunk, last) = match self.next_chunk(&mut body, &cancel).await {
                NextChunk::Chunk(chunk) => (chunk, false),
                NextChunk::Last(chunk) => (chunk, true),
                NextChunk::End => break SessionEnd::Finished,
                NextChunk::Cancelled => break SessionEnd::Aborted,
                NextChunk::Failed(e) => break SessionEnd::Failed(e),
            };

            self.transition(StreamEvent::ChunkReceived, observer).await;
            match self.decoder.feed(&chunk) {
                Ok(events) => {
                    if let Some(error) = self.apply_events(events, observer).await {
                        break SessionEnd::ServerError(error);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %self.message.id,
                        error = %e,
                        "StreamSession: undecodable chunk skipped"
                    );
                    observer.on_decode_error(&e).await;
                }
            }

            if last {
                break SessionEnd::Aborted;
            }
        };

        self.finish(end, observer).await
    }

    async fn next_chunk(&self, body: &mut ByteStream, cancel: &CancellationToken) -> NextChunk {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = body.next() => Some(item),
        };
        let Some(item) = item else {
            return self.grace_chunk(body).await;
        };
        match item {
            Some(Ok(chunk)) => NextChunk::Chunk(chunk),
            Some(Err(e)) => NextChunk::Failed(e),
            None => NextChunk::End,
        }
    }

    async fn grace_chunk(&self, body: &mut ByteStream) -> NextChunk {
        if self.abort_grace.is_zero() {
            return NextChunk::Cancelled;
        }
        match tokio::time::timeout(self.abort_grace, body.next()).await {
            Ok(Some(Ok(chunk))) => NextChunk::Last(chunk),
            _ => NextChunk::Cancelled,
        }
    }

    /// Apply decoded events in order. Returns the message of an `error`
    /// event, which ends the stream.
    async fn apply_events<O>(&mut self, events: Vec<ProtocolEvent>, observer: &mut O) -> Option<String>
    where
        O: SessionObserver + ?Sized,
    {
        for event in events {
            if let ProtocolEvent::Error(error) = &event {
                tracing::warn!(
                    message_id = %self.message.id,
                    error = %error,
                    "StreamSession: server reported an error"
                );
                return Some(error.clone());
            }

            if let ProtocolEvent::StartStep(step) = &event {
                if let Some(id) = step.message_id.as_deref() {
                    if self.fresh && !self.announced && id != self.message.id && observer.accepts_id(id) {
                        tracing::debug!(
                            local_id = %self.message.id,
                            server_id = %id,
                            "StreamSession: adopting server message id"
                        );
                        self.message.id = id.to_string();
                    }
                }
            }

            let lifecycle = event.is_lifecycle();
            self.message = self.assembler.push(&self.message, event);
            if lifecycle {
                continue;
            }
            self.announced = true;
            observer.on_message(&self.message).await;
        }
        None
    }

    async fn finish<O>(mut self, end: SessionEnd, observer: &mut O) -> SessionOutcome
    where
        O: SessionObserver + ?Sized,
    {
        let mut end = end;
        // Only a body that ended normally has a last line to flush. After an
        // abort the carry is an unfinished line and is dropped.
        if matches!(end, SessionEnd::Finished) {
            let events = self.decoder.finish();
            if let Some(error) = self.apply_events(events, observer).await {
                end = SessionEnd::ServerError(error);
            }
        }

        let event = match &end {
            SessionEnd::Finished => StreamEvent::StreamFinished,
            SessionEnd::Aborted => StreamEvent::Aborted,
            SessionEnd::Failed(e) => StreamEvent::TransportFailed {
                error: e.to_string(),
            },
            SessionEnd::ServerError(error) => StreamEvent::TransportFailed {
                error: error.clone(),
            },
        };
        self.transition(event, observer).await;

        let steps = self.assembler.steps().clone();
        tracing::debug!(
            message_id = %self.message.id,
            end = ?end,
            is_continued = steps.is_continued,
            "StreamSession: finished"
        );
        SessionOutcome {
            message: self.announced.then_some(self.message),
            end,
            steps,
        }
    }

    async fn transition<O>(&mut self, event: StreamEvent, observer: &mut O)
    where
        O: SessionObserver + ?Sized,
    {
        let transition = self.machine.handle_event(event);
        if transition.changed {
            observer.on_status(&transition.to).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use stream_protocol::encode_data_line;

    #[derive(Default)]
    struct ScriptedTransport {
        chunks: Vec<Result<Vec<u8>, String>>,
        /// Keep the body open after the last chunk.
        hang: bool,
    }

    fn ok(bytes: &[u8]) -> Result<Vec<u8>, String> {
        Ok(bytes.to_vec())
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open(
            &self,
            _request: ChatRequest,
            _cancel: CancellationToken,
        ) -> Result<ByteStream, TransportError> {
            let items: Vec<Result<Bytes, TransportError>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(bytes) => Ok(Bytes::from(bytes.clone())),
                    Err(e) => Err(TransportError::Stream(e.clone())),
                })
                .collect();
            if self.hang {
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            } else {
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        statuses: Vec<StreamStatus>,
        messages: Vec<Message>,
        decode_errors: usize,
        refuse_ids: bool,
        cancel_on_message: Option<CancellationToken>,
    }

    #[async_trait]
    impl SessionObserver for Recorder {
        async fn on_status(&mut self, status: &StreamStatus) {
            self.statuses.push(status.clone());
        }

        async fn on_message(&mut self, message: &Message) {
            self.messages.push(message.clone());
            if let Some(cancel) = &self.cancel_on_message {
                cancel.cancel();
            }
        }

        async fn on_decode_error(&mut self, _error: &DecodeError) {
            self.decode_errors += 1;
        }

        fn accepts_id(&self, _id: &str) -> bool {
            !self.refuse_ids
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![Message::user("Hi")], &chat_core::ChatConfig::default())
    }

    fn reply() -> SessionTarget {
        SessionTarget::Reply {
            parent_id: Some("u1".to_string()),
            model: None,
        }
    }

    #[tokio::test]
    async fn streams_data_lines_into_one_message() {
        let transport = ScriptedTransport {
            chunks: vec![
                ok(b"f:{\"messageId\":\"srv-1\"}\n0:\"Hi \""),
                ok(b"\n0:\"there!\"\ne:{\"finishReason\":\"stop\",\"isContinued\":true}\n"),
            ],
            ..ScriptedTransport::default()
        };
        let mut recorder = Recorder::default();
        let outcome = StreamSession::new(StreamProtocol::Data, reply())
            .run(&transport, request(), CancellationToken::new(), &mut recorder)
            .await;

        assert!(matches!(outcome.end, SessionEnd::Finished));
        let message = outcome.message.unwrap();
        assert_eq!(message.id, "srv-1");
        assert_eq!(message.content, "Hi there!");
        assert_eq!(message.parent_id.as_deref(), Some("u1"));
        assert!(message.model.is_some());
        assert!(outcome.steps.is_continued);
        assert_eq!(
            recorder.statuses,
            vec![
                StreamStatus::Submitted,
                StreamStatus::Streaming,
                StreamStatus::Ready
            ]
        );
        assert_eq!(recorder.messages.len(), 2);
    }

    #[tokio::test]
    async fn refused_server_id_keeps_local_id() {
        let transport = ScriptedTransport {
            chunks: vec![ok(b"f:{\"messageId\":\"srv-1\"}\n0:\"x\"\n")],
            ..ScriptedTransport::default()
        };
        let mut recorder = Recorder {
            refuse_ids: true,
            ..Recorder::default()
        };
        let session = StreamSession::new(StreamProtocol::Data, reply());
        let local_id = session.message_id().to_string();
        let outcome = session
            .run(&transport, request(), CancellationToken::new(), &mut recorder)
            .await;
        assert_eq!(outcome.message.unwrap().id, local_id);
    }

    #[tokio::test]
    async fn invalid_utf8_chunk_is_reported_and_skipped() {
        let transport = ScriptedTransport {
            chunks: vec![ok(b"0:\"a\"\n"), ok(&[0xff, 0xfe, b'\n']), ok(b"0:\"b\"\n")],
            ..ScriptedTransport::default()
        };
        let mut recorder = Recorder::default();
        let outcome = StreamSession::new(StreamProtocol::Data, reply())
            .run(&transport, request(), CancellationToken::new(), &mut recorder)
            .await;
        assert_eq!(recorder.decode_errors, 1);
        assert_eq!(outcome.message.unwrap().content, "ab");
    }

    #[tokio::test]
    async fn server_error_event_ends_stream_keeping_partial() {
        let line = encode_data_line(&ProtocolEvent::Error("overloaded".to_string()));
        let transport = ScriptedTransport {
            chunks: vec![Ok(format!("0:\"par\"\n{line}0:\"tial\"\n").into_bytes())],
            ..ScriptedTransport::default()
        };
        let mut recorder = Recorder::default();
        let outcome = StreamSession::new(StreamProtocol::Data, reply())
            .run(&transport, request(), CancellationToken::new(), &mut recorder)
            .await;

        assert!(matches!(outcome.end, SessionEnd::ServerError(ref e) if e == "overloaded"));
        assert_eq!(outcome.message.unwrap().content, "par");
        assert_eq!(
            recorder.statuses.last().and_then(|s| s.error_message()),
            Some("overloaded")
        );
    }

    #[tokio::test]
    async fn transport_failure_keeps_partial_message() {
        let transport = ScriptedTransport {
            chunks: vec![
                ok(b"0:\"Hel\"\n0:\"lo\"\n0:\"unfini"),
                Err("connection reset".to_string()),
            ],
            ..ScriptedTransport::default()
        };
        let mut recorder = Recorder::default();
        let outcome = StreamSession::new(StreamProtocol::Data, reply())
            .run(&transport, request(), CancellationToken::new(), &mut recorder)
            .await;

        assert!(matches!(outcome.end, SessionEnd::Failed(TransportError::Stream(_))));
        assert_eq!(outcome.message.unwrap().content, "Hello");
        assert!(matches!(recorder.statuses.last(), Some(StreamStatus::Error { .. })));
    }

    #[tokio::test]
    async fn cancelled_before_open_creates_nothing() {
        let transport = ScriptedTransport::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut recorder = Recorder::default();
        let outcome = StreamSession::new(StreamProtocol::Text, reply())
            .run(&transport, request(), cancel, &mut recorder)
            .await;

        assert!(matches!(outcome.end, SessionEnd::Aborted));
        assert!(outcome.message.is_none());
        assert_eq!(recorder.statuses.last(), Some(&StreamStatus::Ready));
    }

    #[tokio::test]
    async fn abort_mid_line_drops_unfinished_line() {
        let transport = ScriptedTransport {
            chunks: vec![ok(b"0:\"Hel\"\ndata: {\"type\":\"text\",\"va")],
            hang: true,
        };
        let cancel = CancellationToken::new();
        let mut recorder = Recorder {
            cancel_on_message: Some(cancel.clone()),
            ..Recorder::default()
        };
        let outcome = StreamSession::new(StreamProtocol::Data, reply())
            .run(&transport, request(), cancel, &mut recorder)
            .await;

        assert!(matches!(outcome.end, SessionEnd::Aborted));
        assert_eq!(outcome.message.unwrap().content, "Hel");
        assert_eq!(recorder.messages.len(), 1);
        assert_eq!(recorder.statuses.last(), Some(&StreamStatus::Ready));
    }

    #[tokio::test]
    async fn abort_grace_applies_complete_lines_of_racing_chunk() {
        let transport = ScriptedTransport {
            chunks: vec![
                ok(b"0:\"Hel\"\n"),
                ok(b"0:\"lo\"\ndata: {\"type\":\"text\",\"va"),
            ],
            hang: true,
        };
        let cancel = CancellationToken::new();
        let mut recorder = Recorder {
            cancel_on_message: Some(cancel.clone()),
            ..Recorder::default()
        };
        let outcome = StreamSession::new(StreamProtocol::Data, reply())
            .with_abort_grace(Duration::from_millis(50))
            .run(&transport, request(), cancel, &mut recorder)
            .await;

        assert!(matches!(outcome.end, SessionEnd::Aborted));
        assert_eq!(outcome.message.unwrap().content, "Hello");
        assert_eq!(recorder.statuses.last(), Some(&StreamStatus::Ready));
    }

    #[tokio::test]
    async fn abort_grace_expires_when_nothing_arrives() {
        let transport = ScriptedTransport {
            chunks: vec![ok(b"0:\"Hel\"\n")],
            hang: true,
        };
        let cancel = CancellationToken::new();
        let mut recorder = Recorder {
            cancel_on_message: Some(cancel.clone()),
            ..Recorder::default()
        };
        let outcome = StreamSession::new(StreamProtocol::Data, reply())
            .with_abort_grace(Duration::from_millis(20))
            .run(&transport, request(), cancel, &mut recorder)
            .await;

        assert!(matches!(outcome.end, SessionEnd::Aborted));
        assert_eq!(outcome.message.unwrap().content, "Hel");
    }

    #[tokio::test]
    async fn empty_text_response_still_has_text_part() {
        let transport = ScriptedTransport::default();
        let mut recorder = Recorder::default();
        let outcome = StreamSession::new(StreamProtocol::Text, reply())
            .run(&transport, request(), CancellationToken::new(), &mut recorder)
            .await;

        let message = outcome.message.unwrap();
        assert_eq!(message.content, "");
        assert_eq!(message.text_part_count(), 1);
    }

    #[tokio::test]
    async fn continue_appends_to_existing_message() {
        let mut existing = Message::assistant(Some("gpt-4o".to_string())).with_id("a1");
        existing.content = "Once upon".to_string();
        existing.parts = vec![chat_core::MessagePart::text("Once upon")];

        let transport = ScriptedTransport {
            chunks: vec![ok(b" a time")],
            ..ScriptedTransport::default()
        };
        let mut recorder = Recorder::default();
        let outcome = StreamSession::new(
            StreamProtocol::Text,
            SessionTarget::Continue { message: existing },
        )
        .run(&transport, request(), CancellationToken::new(), &mut recorder)
        .await;

        let message = outcome.message.unwrap();
        assert_eq!(message.id, "a1");
        assert_eq!(message.content, "Once upon a time");
        assert_eq!(message.text_part_count(), 1);
    }
}
