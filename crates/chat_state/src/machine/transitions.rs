//! Status transitions
//!
//! `StateMachine` maps (status, event) pairs to the next status and keeps a
//! short history for debugging.

use thiserror::Error;

use super::events::StreamEvent;
use super::states::StreamStatus;

/// An event that does not apply in the current status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} with event {event}")]
    InvalidTransition { from: StreamStatus, event: String },
}

/// One applied event.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: StreamStatus,
    pub to: StreamStatus,
    pub event: StreamEvent,
    /// False when the event left the status as it was.
    pub changed: bool,
}

/// State machine for a conversation's stream status.
#[derive(Debug, Clone)]
pub struct StateMachine {
    /// Current state.
    current_state: StreamStatus,
    /// Most recent transitions, oldest first.
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine in Ready state.
    pub fn new() -> Self {
        Self::with_state(StreamStatus::Ready)
    }

    /// Start from `state`, e.g. the error left by a previous request.
    pub fn with_state(state: StreamStatus) -> Self {
        Self {
            current_state: state,
            history: Vec::new(),
            max_history: 50,
        }
    }

    pub fn state(&self) -> &StreamStatus {
        &self.current_state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Handle an event and transition to a new state. Events that do not
    /// apply in the current state leave it unchanged.
    pub fn handle_event(&mut self, event: StreamEvent) -> StateTransition {
        let old_state = self.current_state.clone();
        let new_state = Self::compute_next_state(&old_state, &event);
        let changed = old_state != new_state;

        if changed {
            tracing::debug!(
                from = old_state.name(),
                to = new_state.name(),
                event = ?event,
                "StreamStatus: transition"
            );
        }

        self.current_state = new_state.clone();

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            event,
            changed,
        };

        // Add to history
        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        transition
    }

    /// Like [`handle_event`](Self::handle_event) but rejects events that do
    /// not apply in the current state.
    pub fn try_handle_event(
        &mut self,
        event: StreamEvent,
    ) -> Result<StateTransition, TransitionError> {
        if !Self::is_valid(&self.current_state, &event) {
            return Err(TransitionError::InvalidTransition {
                from: self.current_state.clone(),
                event: format!("{event:?}"),
            });
        }
        Ok(self.handle_event(event))
    }

    fn is_valid(state: &StreamStatus, event: &StreamEvent) -> bool {
        use StreamEvent::*;
        use StreamStatus::*;

        match (state, event) {
            (_, Reset) => true,
            (Ready | Error { .. }, RequestSubmitted) => true,
            (Submitted | Streaming, ChunkReceived) => true,
            (Submitted | Streaming, StreamFinished | Aborted | TransportFailed { .. }) => true,
            _ => false,
        }
    }

    fn compute_next_state(state: &StreamStatus, event: &StreamEvent) -> StreamStatus {
        use StreamEvent::*;
        use StreamStatus::*;

        if !Self::is_valid(state, event) {
            return state.clone();
        }

        match (state, event) {
            (_, Reset) => Ready,
            (_, RequestSubmitted) => Submitted,
            (_, ChunkReceived) => Streaming,
            (_, StreamFinished) | (_, Aborted) => Ready,
            (_, TransportFailed { error }) => Error {
                error_message: error.clone(),
                failed_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    /// Whether `event` would change the status.
    pub fn can_transition(&self, event: &StreamEvent) -> bool {
        let next = Self::compute_next_state(&self.current_state, event);
        next != self.current_state
    }

    /// Reset to Ready state.
    pub fn reset(&mut self) {
        self.handle_event(StreamEvent::Reset);
    }
}
