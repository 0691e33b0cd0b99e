//! Updates pushed to the UI collaborator

use chat_core::Message;
use chat_state::StreamStatus;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatUpdate {
    Status {
        status: StreamStatus,
    },
    /// A message was created or replaced.
    MessageUpdated {
        message: Message,
    },
    /// The active path changed; re-read it.
    PathChanged {
        #[serde(rename = "currentId")]
        current_id: Option<String>,
    },
    DecodeError {
        error: String,
    },
    Finished {
        #[serde(rename = "messageId")]
        message_id: Option<String>,
        aborted: bool,
        #[serde(rename = "isContinued")]
        is_continued: bool,
    },
}

/// Send if anyone is listening. A closed receiver is not an error.
pub(crate) async fn emit(events: Option<&mpsc::Sender<ChatUpdate>>, update: ChatUpdate) {
    if let Some(tx) = events {
        if tx.send(update).await.is_err() {
            tracing::trace!("ChatUpdate receiver dropped");
        }
    }
}
