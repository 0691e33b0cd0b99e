//! chat_state - Status machine for one conversation's request lifecycle
//!
//! Tracks whether a conversation is idle, waiting for the first chunk,
//! streaming, or stopped on an error.

pub mod machine;

// Re-export commonly used types
pub use machine::{StateMachine, StateTransition, StreamEvent, StreamStatus, TransitionError};
