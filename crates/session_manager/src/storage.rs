//! Conversation snapshot storage

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chat_core::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::PersistenceError;

/// Everything needed to rebuild a conversation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub current_id: Option<String>,
    pub saved_at: DateTime<Utc>,
}

/// Save collaborator. `save` must be idempotent: the same snapshot may be
/// written more than once.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(
        &self,
        conversation_id: &str,
        messages: &[Message],
        current_id: Option<&str>,
    ) -> Result<(), PersistenceError>;

    async fn load(&self, conversation_id: &str)
        -> Result<Option<ConversationSnapshot>, PersistenceError>;

    /// Snapshot to fall back to after an abort. Stores that keep a separate
    /// "last known good" copy override this.
    async fn restore(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSnapshot>, PersistenceError> {
        self.load(conversation_id).await
    }
}

/// One pretty-printed JSON file per conversation.
pub struct FileConversationStore {
    base_path: PathBuf,
}

impl FileConversationStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Store under the application data directory.
    pub fn in_app_dir() -> Self {
        Self::new(chat_core::paths::conversations_dir())
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn snapshot_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{conversation_id}.json"))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn save(
        &self,
        conversation_id: &str,
        messages: &[Message],
        current_id: Option<&str>,
    ) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_path).await?;

        let snapshot = ConversationSnapshot {
            conversation_id: conversation_id.to_string(),
            messages: messages.to_vec(),
            current_id: current_id.map(str::to_string),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        // Write then rename so a crash never leaves a truncated snapshot.
        let path = self.snapshot_path(conversation_id);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &path).await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_count = messages.len(),
            "FileConversationStore: saved snapshot"
        );
        Ok(())
    }

    async fn load(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSnapshot>, PersistenceError> {
        let path = self.snapshot_path(conversation_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// In-memory store for embedding and tests.
#[derive(Default)]
pub struct MemoryConversationStore {
    snapshots: RwLock<HashMap<String, ConversationSnapshot>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, snapshot: ConversationSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.conversation_id.clone(), snapshot);
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn save(
        &self,
        conversation_id: &str,
        messages: &[Message],
        current_id: Option<&str>,
    ) -> Result<(), PersistenceError> {
        self.insert(ConversationSnapshot {
            conversation_id: conversation_id.to_string(),
            messages: messages.to_vec(),
            current_id: current_id.map(str::to_string),
            saved_at: Utc::now(),
        })
        .await;
        Ok(())
    }

    async fn load(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSnapshot>, PersistenceError> {
        Ok(self.snapshots.read().await.get(conversation_id).cloned())
    }
}
