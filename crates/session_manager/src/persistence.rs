//! Debounced, at-least-once persistence of a conversation tree

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chat_core::Message;
use context_manager::ConversationTree;
use tokio::time::Instant;

use crate::storage::ConversationStore;

/// Tree contents staged for the next write.
#[derive(Debug, Clone)]
struct Snapshot {
    version: u64,
    messages: Vec<Message>,
    current_id: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    pending: Option<Snapshot>,
    version: u64,
    last_write: Option<Instant>,
    failures: u32,
    /// A trailing write is waiting for the interval to elapse.
    scheduled: bool,
}

impl State {
    fn stage(&mut self, tree: &ConversationTree) {
        self.version += 1;
        self.pending = Some(Snapshot {
            version: self.version,
            messages: tree.to_vec(),
            current_id: tree.current_id().map(str::to_string),
        });
    }
}

struct Shared {
    store: Arc<dyn ConversationStore>,
    conversation_id: String,
    state: Mutex<State>,
    /// Serializes saves so an older snapshot never lands after a newer one.
    write_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Save the latest staged snapshot, if any.
    async fn write_pending(&self) -> bool {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut state = self.state();
            let snapshot = state.pending.clone();
            if snapshot.is_some() {
                state.last_write = Some(Instant::now());
            }
            snapshot
        };
        let Some(snapshot) = snapshot else {
            return true;
        };

        let result = self
            .store
            .save(
                &self.conversation_id,
                &snapshot.messages,
                snapshot.current_id.as_deref(),
            )
            .await;

        let mut state = self.state();
        match result {
            Ok(()) => {
                // A newer snapshot staged during the save stays pending.
                if state.pending.as_ref().map(|p| p.version) == Some(snapshot.version) {
                    state.pending = None;
                }
                state.failures = 0;
                tracing::debug!(
                    conversation_id = %self.conversation_id,
                    message_count = snapshot.messages.len(),
                    "DebouncedPersister: saved"
                );
                true
            }
            Err(e) => {
                state.failures += 1;
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    failures = state.failures,
                    error = %e,
                    "DebouncedPersister: save failed, keeping snapshot pending"
                );
                false
            }
        }
    }
}

/// Coalesces tree mutations into at most one write per `interval`.
///
/// A mutation inside the interval is written when the interval runs out,
/// so the last state is saved even if nothing else happens. A failed write
/// leaves the snapshot pending; it is retried on the next `touch` or
/// `flush`. Failures are logged and never returned.
pub struct DebouncedPersister {
    shared: Arc<Shared>,
    interval: Duration,
}

impl DebouncedPersister {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        conversation_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                conversation_id: conversation_id.into(),
                state: Mutex::new(State::default()),
                write_lock: tokio::sync::Mutex::new(()),
            }),
            interval,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.shared.store
    }

    pub fn conversation_id(&self) -> &str {
        &self.shared.conversation_id
    }

    pub fn has_pending(&self) -> bool {
        self.shared.state().pending.is_some()
    }

    /// Consecutive failed writes since the last success.
    pub fn failures(&self) -> u32 {
        self.shared.state().failures
    }

    /// Record a mutation. Writes now if the interval has elapsed, otherwise
    /// schedules a write for when it does.
    pub async fn touch(&mut self, tree: &ConversationTree) {
        let wake_at = {
            let mut state = self.shared.state();
            state.stage(tree);
            match state.last_write {
                Some(last) if last.elapsed() < self.interval => {
                    if state.scheduled {
                        return;
                    }
                    state.scheduled = true;
                    Some(last + self.interval)
                }
                _ => None,
            }
        };

        match wake_at {
            Some(at) => self.schedule(at),
            None => {
                self.shared.write_pending().await;
            }
        }
    }

    /// Write unconditionally. Returns whether the write succeeded.
    pub async fn flush(&mut self, tree: &ConversationTree) -> bool {
        self.shared.state().stage(tree);
        self.shared.write_pending().await
    }

    /// Forget a pending write, e.g. after restoring a stored snapshot.
    pub fn discard_pending(&mut self) {
        self.shared.state().pending = None;
    }

    fn schedule(&self, at: Instant) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            shared.state().scheduled = false;
            shared.write_pending().await;
        });
    }
}
