//! Message module - Message and content part types
//!
//! Shared message types used across the system.

mod content;
mod types;

pub use content::{MessagePart, Source, ToolInvocation, ToolInvocationState};
pub use types::{generate_id, Message, Role, UNKNOWN_MODEL};
