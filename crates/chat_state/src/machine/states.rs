//! Stream states - where a conversation is in its request lifecycle

use serde::{Deserialize, Serialize};

/// Status exposed to the UI while a response is requested and streamed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StreamStatus {
    /// No request in flight; input is accepted.
    #[default]
    Ready,

    /// Request issued, no chunk received yet.
    Submitted,

    /// Chunks are arriving.
    Streaming,

    /// The last request failed. The partial message is kept.
    Error {
        error_message: String,
        failed_at: String, // ISO timestamp
    },
}

impl StreamStatus {
    /// A request is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Submitted | Self::Streaming)
    }

    /// Check if this state allows a new request.
    pub fn accepts_user_input(&self) -> bool {
        !self.is_busy()
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Submitted => "submitted",
            Self::Streaming => "streaming",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_states() {
        assert!(!StreamStatus::Ready.is_busy());
        assert!(StreamStatus::Submitted.is_busy());
        assert!(StreamStatus::Streaming.is_busy());
        assert!(StreamStatus::Error {
            error_message: "boom".into(),
            failed_at: String::new(),
        }
        .accepts_user_input());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(StreamStatus::Streaming).unwrap();
        assert_eq!(json["status"], "streaming");
    }
}
