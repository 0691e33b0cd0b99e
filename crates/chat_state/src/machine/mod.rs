//! State machine module
//!
//! Contains the FSM for the stream lifecycle of a conversation.

mod events;
mod states;
mod transitions;

pub use events::StreamEvent;
pub use states::StreamStatus;
pub use transitions::{StateMachine, StateTransition, TransitionError};
