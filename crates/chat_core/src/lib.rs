//! chat_core - Core types shared by the conversation crates
//!
//! - `message` - Message, Role and the closed MessagePart union
//! - `protocol` - StreamProtocol (text or data wire format)
//! - `config` - ChatConfig loaded from file and environment
//! - `paths` - application directories

pub mod config;
pub mod message;
pub mod paths;
pub mod protocol;

// Re-export commonly used types
pub use config::ChatConfig;
pub use message::{
    generate_id, Message, MessagePart, Role, Source, ToolInvocation, ToolInvocationState,
    UNKNOWN_MODEL,
};
pub use protocol::StreamProtocol;
