use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::content::{MessagePart, Source, ToolInvocation};

/// Model name recorded on assistant messages whose producer is not known.
pub const UNKNOWN_MODEL: &str = "unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation message.
///
/// Messages are values: every update produces a new `Message` that replaces
/// the previous one in the conversation tree. `parent_id`/`children_ids` are
/// id references into the owning tree, never owning pointers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "generate_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let parts = if content.is_empty() {
            Vec::new()
        } else {
            vec![MessagePart::text(content.clone())]
        };
        Self {
            id: generate_id(),
            role,
            content,
            parts,
            parent_id: None,
            children_ids: Vec::new(),
            model: None,
            created_at: Utc::now(),
        }
        .normalized()
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// An empty assistant message produced by `model`.
    pub fn assistant(model: Option<String>) -> Self {
        let mut message = Self::new(Role::Assistant, "");
        if let Some(model) = model {
            message.model = Some(model);
        }
        message
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Enforce the role-dependent `model` rule: assistants always carry one,
    /// other roles never do.
    pub fn normalized(mut self) -> Self {
        if self.role == Role::Assistant {
            if self.model.as_deref().map_or(true, str::is_empty) {
                self.model = Some(UNKNOWN_MODEL.to_string());
            }
        } else {
            self.model = None;
        }
        self
    }

    /// Concatenation of all text parts.
    pub fn text_from_parts(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn text_part_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, MessagePart::Text { .. }))
            .count()
    }

    /// Reasoning text, if the message has a reasoning part.
    pub fn reasoning(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::Reasoning { reasoning, .. } => Some(reasoning.as_str()),
            _ => None,
        })
    }

    pub fn tool_invocations(&self) -> Vec<&ToolInvocation> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::ToolInvocation { tool_invocation } => Some(tool_invocation),
                _ => None,
            })
            .collect()
    }

    pub fn tool_invocation(&self, tool_call_id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations()
            .into_iter()
            .find(|t| t.tool_call_id == tool_call_id)
    }

    pub fn sources(&self) -> Vec<&Source> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Source { source } => Some(source),
                _ => None,
            })
            .collect()
    }

    pub fn annotations(&self) -> Vec<&Value> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Data {
                    value,
                    annotation: true,
                } => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Keyed view over every data/annotation part. Object payloads are merged
    /// key by key in part order, so a later key wins and distinct keys coexist.
    pub fn data(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for part in &self.parts {
            if let MessagePart::Data {
                value: Value::Object(object),
                ..
            } = part
            {
                for (key, value) in object {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }
}
