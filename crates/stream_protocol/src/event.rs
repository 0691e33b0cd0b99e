//! Typed protocol events produced by the wire decoder.

use chat_core::Source;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
}

/// Incremental update for one tool call, addressed by `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallDelta {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_text_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallDelta {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: None,
            args: None,
            args_text_delta: None,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FinishStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub is_continued: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FinishMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// One decoded unit of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Text(String),
    Reasoning(String),
    ReasoningSignature(String),
    Source(Source),
    /// Message annotations; a JSON array or a single value
    Annotations(Value),
    ToolCall(ToolCallDelta),
    /// Stream data; a JSON array or a single value
    Data(Value),
    File(FilePayload),
    StartStep(StartStep),
    FinishStep(FinishStep),
    FinishMessage(FinishMessage),
    Error(String),
}

impl ProtocolEvent {
    /// Wire name used in the `type` field of `data:` lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            ProtocolEvent::Text(_) => "text",
            ProtocolEvent::Reasoning(_) => "reasoning",
            ProtocolEvent::ReasoningSignature(_) => "reasoning_signature",
            ProtocolEvent::Source(_) => "source",
            ProtocolEvent::Annotations(_) => "annotations",
            ProtocolEvent::ToolCall(_) => "tool_call",
            ProtocolEvent::Data(_) => "data",
            ProtocolEvent::File(_) => "file",
            ProtocolEvent::StartStep(_) => "start_step",
            ProtocolEvent::FinishStep(_) => "finish_step",
            ProtocolEvent::FinishMessage(_) => "finish_message",
            ProtocolEvent::Error(_) => "error",
        }
    }

    /// Lifecycle markers carry no message content.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::StartStep(_)
                | ProtocolEvent::FinishStep(_)
                | ProtocolEvent::FinishMessage(_)
        )
    }

    /// Build an event from a `type` name and its JSON `value`.
    ///
    /// Returns `None` for unknown types or values of the wrong shape.
    pub fn from_typed_value(type_name: &str, value: Value) -> Option<Self> {
        let event = match type_name {
            "text" => ProtocolEvent::Text(value_as_string(value)?),
            "reasoning" => ProtocolEvent::Reasoning(value_as_string(value)?),
            "reasoning_signature" => ProtocolEvent::ReasoningSignature(match value {
                Value::String(s) => s,
                Value::Object(mut object) => match object.remove("signature") {
                    Some(Value::String(s)) => s,
                    _ => return None,
                },
                _ => return None,
            }),
            "source" => ProtocolEvent::Source(serde_json::from_value(value).ok()?),
            "annotations" => ProtocolEvent::Annotations(value),
            "tool_call" => ProtocolEvent::ToolCall(serde_json::from_value(value).ok()?),
            "data" => ProtocolEvent::Data(value),
            "file" => ProtocolEvent::File(serde_json::from_value(value).ok()?),
            "start_step" => ProtocolEvent::StartStep(from_value_or_default(value)?),
            "finish_step" => ProtocolEvent::FinishStep(from_value_or_default(value)?),
            "finish_message" => ProtocolEvent::FinishMessage(from_value_or_default(value)?),
            "error" => ProtocolEvent::Error(match value {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            _ => return None,
        };
        Some(event)
    }

    /// JSON `value` field of this event in the `data:` format.
    pub fn to_value(&self) -> Value {
        match self {
            ProtocolEvent::Text(s) | ProtocolEvent::Reasoning(s) | ProtocolEvent::Error(s) => {
                Value::String(s.clone())
            }
            ProtocolEvent::ReasoningSignature(signature) => json!({ "signature": signature }),
            ProtocolEvent::Source(source) => json!(source),
            ProtocolEvent::Annotations(value) | ProtocolEvent::Data(value) => value.clone(),
            ProtocolEvent::ToolCall(delta) => json!(delta),
            ProtocolEvent::File(file) => json!(file),
            ProtocolEvent::StartStep(step) => json!(step),
            ProtocolEvent::FinishStep(step) => json!(step),
            ProtocolEvent::FinishMessage(finish) => json!(finish),
        }
    }
}

fn value_as_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn from_value_or_default<T>(value: Value) -> Option<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    if value.is_null() {
        return Some(T::default());
    }
    serde_json::from_value(value).ok()
}
