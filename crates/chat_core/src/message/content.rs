//! MessagePart - typed message fragments
//!
//! A message is a sequence of closed, tagged parts. Auxiliary views such as
//! reasoning text, tool invocations or the keyed data map are derived from
//! the parts and never stored a second time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A fragment of message content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    /// Running model/user text
    Text { text: String },

    /// Model reasoning, chunks joined by a newline
    Reasoning {
        reasoning: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A tool call tracked by its call id
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },

    /// A cited source
    Source { source: Source },

    /// Freeform payload (stream data or message annotation)
    Data {
        value: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        annotation: bool,
    },

    /// File attachment reference
    File {
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
}

impl MessagePart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a reasoning part without signature
    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self::Reasoning {
            reasoning: reasoning.into(),
            signature: None,
        }
    }

    /// Create a data part
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            annotation: false,
        }
    }

    /// Create an annotation part
    pub fn annotation(value: Value) -> Self {
        Self::Data {
            value,
            annotation: true,
        }
    }

    /// Get text content if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Short kind name, matching the serialized tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolInvocation { .. } => "tool-invocation",
            Self::Source { .. } => "source",
            Self::Data { .. } => "data",
            Self::File { .. } => "file",
        }
    }
}

/// Lifecycle of a tool invocation inside an assistant message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolInvocationState {
    #[default]
    Pending,
    Result,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default = "empty_args")]
    pub args: Value,
    #[serde(default)]
    pub state: ToolInvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolInvocation {
    pub fn pending(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args: empty_args(),
            state: ToolInvocationState::Pending,
            result: None,
            error: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default = "default_source_type")]
    pub source_type: String,
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

fn default_source_type() -> String {
    "url".to_string()
}
