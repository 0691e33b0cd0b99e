//! Session manager error types

use context_manager::TreeError;
use thiserror::Error;

/// Failure to open or read the response stream.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream error: {0}")]
    Stream(String),

    /// The request was cancelled before the response arrived.
    #[error("request cancelled")]
    Cancelled,
}

/// Failure of the persistence collaborator.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server sent an `error` event; the partial message is kept.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
