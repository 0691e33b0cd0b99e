//! `context_manager` - the in-memory model of one branching conversation.
//!
//! - [`MessageAssembler`] folds streamed protocol events into message values.
//! - [`ConversationTree`] owns every message, the parent/child links and the
//!   branch selection, and derives the active path shown to the user.

pub mod assembler;
pub mod error;
pub mod structs;

// Re-export the public API
pub use assembler::{MessageAssembler, SequencedEvent, StepSummary};
pub use error::TreeError;
pub use structs::branch::BranchInfo;
pub use structs::invariants::InvariantViolation;
pub use structs::tree::ConversationTree;
