//! session_manager - Streaming sessions and the branch controller
//!
//! - `transport` - ChatTransport trait and the reqwest HttpTransport
//! - `stream_session` - StreamSession, one request from open to end of body
//! - `controller` - BranchController: send, retry, continue, switch, abort
//! - `storage` / `persistence` - snapshot stores and debounced saving

pub mod abort;
pub mod controller;
pub mod error;
pub mod events;
pub mod persistence;
pub mod storage;
pub mod stream_session;
pub mod transport;

pub use abort::AbortHandle;
pub use controller::{BranchController, SessionReport};
pub use error::{PersistenceError, Result, SessionError, TransportError};
pub use events::ChatUpdate;
pub use persistence::DebouncedPersister;
pub use storage::{
    ConversationSnapshot, ConversationStore, FileConversationStore, MemoryConversationStore,
};
pub use stream_session::{
    SessionEnd, SessionObserver, SessionOutcome, SessionTarget, StreamSession,
};
pub use transport::{ByteStream, ChatRequest, ChatTransport, HttpTransport};
