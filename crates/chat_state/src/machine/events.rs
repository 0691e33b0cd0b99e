//! Stream events - inputs that drive status transitions

use serde::{Deserialize, Serialize};

/// Events raised by a stream session over its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEvent {
    /// A request was handed to the transport.
    RequestSubmitted,

    /// The transport produced a chunk.
    ChunkReceived,

    /// The response body ended normally.
    StreamFinished,

    /// The user cancelled the request. Not an error.
    Aborted,

    /// Network or HTTP failure.
    TransportFailed { error: String },

    /// Clear an error and return to ready.
    Reset,
}

impl StreamEvent {
    /// Check if this event ends a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::StreamFinished | Self::Aborted | Self::TransportFailed { .. }
        )
    }

    /// Check if this is an error event.
    pub fn is_error_event(&self) -> bool {
        matches!(self, Self::TransportFailed { .. })
    }
}
