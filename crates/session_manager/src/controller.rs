//! BranchController - user-facing operations on one conversation
//!
//! Every operation mutates the tree synchronously, then (for send, retry and
//! continue) drives one [`StreamSession`] to completion. Persistence is
//! touched after each mutation and flushed once when a stream ends.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{ChatConfig, Message, MessagePart, Role};
use chat_state::StreamStatus;
use context_manager::{BranchInfo, ConversationTree, StepSummary, TreeError};
use stream_protocol::DecodeError;
use tokio::sync::mpsc;

use crate::abort::AbortHandle;
use crate::error::{Result, SessionError};
use crate::events::{emit, ChatUpdate};
use crate::persistence::DebouncedPersister;
use crate::storage::{ConversationSnapshot, ConversationStore};
use crate::stream_session::{SessionEnd, SessionObserver, SessionTarget, StreamSession};
use crate::transport::{ChatRequest, ChatTransport};

/// Result of a completed (or aborted) stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// The streamed message; `None` if the stream ended before any content.
    pub message_id: Option<String>,
    pub aborted: bool,
    pub steps: StepSummary,
}

pub struct BranchController {
    conversation_id: String,
    config: ChatConfig,
    tree: ConversationTree,
    transport: Arc<dyn ChatTransport>,
    persister: DebouncedPersister,
    status: StreamStatus,
    events: Option<mpsc::Sender<ChatUpdate>>,
    abort: AbortHandle,
}

impl BranchController {
    pub fn new(
        conversation_id: impl Into<String>,
        config: ChatConfig,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let persister =
            DebouncedPersister::new(store, conversation_id.clone(), config.persist_interval());
        Self {
            conversation_id,
            config,
            tree: ConversationTree::new(),
            transport,
            persister,
            status: StreamStatus::Ready,
            events: None,
            abort: AbortHandle::new(),
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<ChatUpdate>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn tree(&self) -> &ConversationTree {
        &self.tree
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }

    /// The transcript currently selected for display.
    pub fn active_path(&self) -> Vec<Message> {
        self.tree.active_path(None).into_iter().cloned().collect()
    }

    pub fn branch_info(&self, parent_id: &str) -> Option<BranchInfo> {
        self.tree.branch_info(parent_id)
    }

    /// Replace the tree with the stored snapshot. Returns `false` if the
    /// store has nothing for this conversation.
    pub async fn load(&mut self) -> Result<bool> {
        let snapshot = self
            .persister
            .store()
            .load(&self.conversation_id)
            .await?;
        Ok(self.replace_tree(snapshot).await)
    }

    /// Append a user message to the active path and stream the reply.
    pub async fn send(&mut self, content: impl Into<String>) -> Result<SessionReport> {
        let parent_id = ConversationTree::resolve_parent(Role::User, self.tree.active_path(None));
        let user = Message::user(content).with_parent(parent_id);
        let mut user_id = user.id.clone();
        self.tree.add_or_replace(user);

        for (removed, keeper) in self.tree.dedupe_user_messages() {
            if removed == user_id {
                tracing::info!(
                    message_id = %removed,
                    keeper = %keeper,
                    "BranchController: resent message merged into existing one"
                );
                user_id = keeper;
            }
        }
        self.tree.set_current(&user_id)?;

        if let Some(user) = self.tree.get(&user_id).cloned() {
            emit(self.events.as_ref(), ChatUpdate::MessageUpdated { message: user }).await;
        }
        self.path_changed().await;
        self.persister.touch(&self.tree).await;

        let target = SessionTarget::Reply {
            parent_id: Some(user_id.clone()),
            model: self.config.model.clone(),
        };
        self.run_stream(target, &user_id, None).await
    }

    /// Stream a new sibling of assistant message `message_id`. The retried
    /// message is kept; the new sibling is appended and selected.
    pub async fn retry(&mut self, message_id: &str) -> Result<SessionReport> {
        let message = self
            .tree
            .get(message_id)
            .ok_or_else(|| TreeError::MessageNotFound(message_id.to_string()))?;
        if !message.is_assistant() {
            return Err(TreeError::NotAssistant(message_id.to_string()).into());
        }
        let model = self.config.model.clone().or_else(|| message.model.clone());

        let parent_id = self.tree.ensure_parent(message_id)?;
        tracing::info!(
            message_id = %message_id,
            parent_id = %parent_id,
            "BranchController: retrying"
        );

        let target = SessionTarget::Reply {
            parent_id: Some(parent_id.clone()),
            model,
        };
        self.run_stream(target, &parent_id, None).await
    }

    /// Stream more output into assistant message `message_id`, which must
    /// not have children yet.
    pub async fn continue_message(&mut self, message_id: &str) -> Result<SessionReport> {
        let message = self
            .tree
            .get(message_id)
            .ok_or_else(|| TreeError::MessageNotFound(message_id.to_string()))?;
        if !message.is_assistant() {
            return Err(TreeError::NotAssistant(message_id.to_string()).into());
        }
        if !message.children_ids.is_empty() {
            return Err(TreeError::HasChildren(message_id.to_string()).into());
        }
        let message = message.clone();

        self.tree.set_current(message_id)?;
        tracing::info!(message_id = %message_id, "BranchController: continuing");

        self.run_stream(
            SessionTarget::Continue { message },
            message_id,
            Some(message_id.to_string()),
        )
        .await
    }

    /// Select child `index` of `parent_id` and show the leaf of that branch.
    /// Returns the index actually selected after clamping.
    pub async fn switch_branch(&mut self, parent_id: &str, index: usize) -> Result<usize> {
        let index = self.tree.switch_branch(parent_id, index)?;
        let child = self
            .tree
            .get(parent_id)
            .and_then(|parent| parent.children_ids.get(index))
            .cloned();
        if let Some(child) = child {
            let leaf = self.tree.drill_to_leaf(&child);
            self.tree.set_current(&leaf)?;
        }

        self.path_changed().await;
        self.persister.touch(&self.tree).await;
        Ok(index)
    }

    /// Cancel the running stream. Returns whether one was running.
    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    /// Cancel, then roll the tree back to the store's restore snapshot.
    pub async fn abort_and_restore(&mut self) -> Result<bool> {
        self.abort.abort();
        let snapshot = self
            .persister
            .store()
            .restore(&self.conversation_id)
            .await?;
        Ok(self.replace_tree(snapshot).await)
    }

    /// Upsert messages supplied from outside (e.g. a server refresh) and
    /// reconcile duplicates. Returns `(removed, keeper)` pairs.
    pub async fn merge_messages(&mut self, batch: Vec<Message>) -> Vec<(String, String)> {
        let merged = self.tree.merge_messages(batch);
        self.path_changed().await;
        self.persister.touch(&self.tree).await;
        merged
    }

    /// Write the tree now. Returns whether the write succeeded.
    pub async fn flush(&mut self) -> bool {
        self.persister.flush(&self.tree).await
    }

    pub fn has_pending_persistence(&self) -> bool {
        self.persister.has_pending()
    }

    async fn replace_tree(&mut self, snapshot: Option<ConversationSnapshot>) -> bool {
        let Some(snapshot) = snapshot else {
            return false;
        };
        self.tree = ConversationTree::from_messages(snapshot.messages, snapshot.current_id);
        self.persister.discard_pending();
        self.path_changed().await;
        true
    }

    async fn path_changed(&self) {
        let current_id = self.tree.current_id().map(str::to_string);
        emit(self.events.as_ref(), ChatUpdate::PathChanged { current_id }).await;
    }

    /// Run one stream. `history_tip` is the last message of the request
    /// history.
    async fn run_stream(
        &mut self,
        target: SessionTarget,
        history_tip: &str,
        continuation: Option<String>,
    ) -> Result<SessionReport> {
        // Installing a token cancels any lingering one.
        let (generation, token) = self.abort.install();
        // Dropping this future mid-stream cancels the request.
        let _guard = token.clone().drop_guard();

        let mut history: Vec<Message> = self
            .tree
            .lineage(history_tip)
            .into_iter()
            .cloned()
            .collect();
        if !self.config.send_reasoning {
            for message in &mut history {
                message
                    .parts
                    .retain(|part| !matches!(part, MessagePart::Reasoning { .. }));
            }
        }
        let mut request = ChatRequest::new(history, &self.config);
        if let Some(message_id) = continuation {
            request = request.with_continuation(message_id);
        }

        let session = StreamSession::new(self.config.stream_protocol, target)
            .with_abort_grace(self.config.abort_grace())
            .with_status(self.status.clone());
        let transport = Arc::clone(&self.transport);
        let mut sink = TreeSink {
            tree: &mut self.tree,
            persister: &mut self.persister,
            events: self.events.as_ref(),
            status: &mut self.status,
        };
        let outcome = session
            .run(transport.as_ref(), request, token, &mut sink)
            .await;
        self.abort.clear(generation);

        if !self.persister.flush(&self.tree).await {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                "BranchController: final save deferred"
            );
        }

        let report = SessionReport {
            message_id: outcome.message.as_ref().map(|m| m.id.clone()),
            aborted: matches!(outcome.end, SessionEnd::Aborted),
            steps: outcome.steps,
        };
        emit(
            self.events.as_ref(),
            ChatUpdate::Finished {
                message_id: report.message_id.clone(),
                aborted: report.aborted,
                is_continued: report.steps.is_continued,
            },
        )
        .await;

        match outcome.end {
            SessionEnd::Finished | SessionEnd::Aborted => Ok(report),
            SessionEnd::Failed(e) => {
                tracing::warn!(error = %e, "BranchController: stream failed, partial message kept");
                Err(SessionError::Transport(e))
            }
            SessionEnd::ServerError(error) => Err(SessionError::Server(error)),
        }
    }
}

/// Applies session output to the controller's tree.
struct TreeSink<'a> {
    tree: &'a mut ConversationTree,
    persister: &'a mut DebouncedPersister,
    events: Option<&'a mpsc::Sender<ChatUpdate>>,
    status: &'a mut StreamStatus,
}

#[async_trait]
impl<'a> SessionObserver for TreeSink<'a> {
    async fn on_status(&mut self, status: &StreamStatus) {
        *self.status = status.clone();
        emit(
            self.events,
            ChatUpdate::Status {
                status: status.clone(),
            },
        )
        .await;
    }

    async fn on_message(&mut self, message: &Message) {
        self.tree.add_or_replace(message.clone());
        if self.tree.current_id() != Some(message.id.as_str()) {
            if let Err(e) = self.tree.set_current(&message.id) {
                tracing::warn!(error = %e, "BranchController: could not select streamed message");
            }
            let current_id = self.tree.current_id().map(str::to_string);
            emit(self.events, ChatUpdate::PathChanged { current_id }).await;
        }
        let message = self
            .tree
            .get(&message.id)
            .cloned()
            .unwrap_or_else(|| message.clone());
        emit(self.events, ChatUpdate::MessageUpdated { message }).await;
        self.persister.touch(self.tree).await;
    }

    async fn on_decode_error(&mut self, error: &DecodeError) {
        emit(
            self.events,
            ChatUpdate::DecodeError {
                error: error.to_string(),
            },
        )
        .await;
    }

    fn accepts_id(&self, id: &str) -> bool {
        !self.tree.contains(id)
    }
}
