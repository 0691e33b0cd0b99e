#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chat_core::{ChatConfig, Message};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use session_manager::{
    BranchController, ByteStream, ChatRequest, ChatTransport, ChatUpdate, ConversationSnapshot,
    ConversationStore, MemoryConversationStore, PersistenceError, TransportError,
};
use stream_protocol::{encode_legacy_line, ProtocolEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BodySender = UnboundedSender<Result<Bytes, TransportError>>;

/// Transport whose response bodies are fed by the test through channels.
#[derive(Default)]
pub struct ChannelTransport {
    bodies: Mutex<VecDeque<futures::channel::mpsc::UnboundedReceiver<Result<Bytes, TransportError>>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response body and return the sender feeding it.
    pub fn push_body(&self) -> BodySender {
        let (tx, rx) = unbounded();
        self.bodies.lock().unwrap().push_back(rx);
        tx
    }

    /// Queue a complete response streaming `chunks` as text deltas.
    pub fn push_text_response(&self, chunks: &[&str]) {
        let tx = self.push_body();
        for chunk in chunks {
            tx.unbounded_send(Ok(text_line(chunk))).unwrap();
        }
    }

    /// Queue a response that fails after the given chunks.
    pub fn push_failing_response(&self, chunks: &[&str], error: &str) {
        let tx = self.push_body();
        for chunk in chunks {
            tx.unbounded_send(Ok(text_line(chunk))).unwrap();
        }
        tx.unbounded_send(Err(TransportError::Stream(error.to_string())))
            .unwrap();
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn open(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        let body = self.bodies.lock().unwrap().pop_front();
        match body {
            Some(rx) => Ok(Box::pin(rx)),
            None => Err(TransportError::Status {
                status: 503,
                body: "no response queued".to_string(),
            }),
        }
    }
}

/// One legacy text line.
pub fn text_line(text: &str) -> Bytes {
    let line = encode_legacy_line(&ProtocolEvent::Text(text.to_string())).unwrap();
    Bytes::from(line)
}

/// Memory store that can be switched into failing mode.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryConversationStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn save(
        &self,
        conversation_id: &str,
        messages: &[Message],
        current_id: Option<&str>,
    ) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Storage("disk full".to_string()));
        }
        self.inner.save(conversation_id, messages, current_id).await
    }

    async fn load(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSnapshot>, PersistenceError> {
        self.inner.load(conversation_id).await
    }
}

pub fn config() -> ChatConfig {
    let mut config = ChatConfig::default();
    config.model = Some("test-model".to_string());
    config.persist_interval_ms = 0;
    config
}

pub fn controller(
    transport: Arc<ChannelTransport>,
    store: Arc<dyn ConversationStore>,
) -> BranchController {
    BranchController::new("c1", config(), transport, store)
}

pub fn controller_with_events(
    transport: Arc<ChannelTransport>,
    store: Arc<dyn ConversationStore>,
) -> (BranchController, mpsc::Receiver<ChatUpdate>) {
    let (tx, rx) = mpsc::channel(256);
    (controller(transport, store).with_events(tx), rx)
}

pub fn contents(path: &[Message]) -> Vec<String> {
    path.iter().map(|m| m.content.clone()).collect()
}

pub fn assert_consistent(controller: &BranchController) {
    let violations = controller.tree().check_invariants();
    assert!(violations.is_empty(), "invariant violations: {violations:?}");
}
