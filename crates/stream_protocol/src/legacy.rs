//! Legacy `code:payload` lines, normalised to [`ProtocolEvent`]s.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::event::{ProtocolEvent, ToolCallDelta};

static LEGACY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9a-z]):(.*)$").expect("legacy line pattern"));

/// Split a line into its single-character code and payload.
pub fn split_legacy_line(line: &str) -> Option<(char, &str)> {
    let captures = LEGACY_LINE.captures(line)?;
    let code = captures.get(1)?.as_str().chars().next()?;
    let payload = captures.get(2)?.as_str();
    Some((code, payload))
}

/// Decode a legacy line. `None` means the code is unknown or the payload
/// does not have the shape the code requires.
pub fn decode_legacy(code: char, payload: &str) -> Option<ProtocolEvent> {
    if code == '0' {
        return Some(ProtocolEvent::Text(decode_text_payload(payload)));
    }

    let value: Value = serde_json::from_str(payload).ok()?;
    match code {
        '2' => Some(ProtocolEvent::Data(value)),
        '3' => ProtocolEvent::from_typed_value("error", value),
        '8' => Some(ProtocolEvent::Annotations(value)),
        '9' => ProtocolEvent::from_typed_value("tool_call", value),
        'a' => {
            let mut delta = tool_call_delta(&value)?;
            delta.result = Some(value.get("result").cloned().unwrap_or(Value::Null));
            Some(ProtocolEvent::ToolCall(delta))
        }
        'b' => tool_call_delta(&value).map(ProtocolEvent::ToolCall),
        'c' => {
            let mut delta = tool_call_delta(&value)?;
            delta.args_text_delta = Some(value.get("argsTextDelta")?.as_str()?.to_string());
            Some(ProtocolEvent::ToolCall(delta))
        }
        'd' => ProtocolEvent::from_typed_value("finish_message", value),
        'e' => ProtocolEvent::from_typed_value("finish_step", value),
        'f' => ProtocolEvent::from_typed_value("start_step", value),
        'g' => ProtocolEvent::from_typed_value("reasoning", value),
        'h' => ProtocolEvent::from_typed_value("source", value),
        'i' => {
            let data = value.get("data")?.as_str()?;
            Some(ProtocolEvent::Reasoning(data.to_string()))
        }
        'j' => ProtocolEvent::from_typed_value("reasoning_signature", value),
        'k' => ProtocolEvent::from_typed_value("file", value),
        _ => None,
    }
}

/// Render an event as a legacy line (without trailing newline).
pub fn encode_legacy(event: &ProtocolEvent) -> Option<String> {
    let (code, value) = match event {
        ProtocolEvent::Text(_) => ('0', event.to_value()),
        ProtocolEvent::Data(_) => ('2', event.to_value()),
        ProtocolEvent::Error(_) => ('3', event.to_value()),
        ProtocolEvent::Annotations(_) => ('8', event.to_value()),
        ProtocolEvent::ToolCall(delta) if delta.result.is_some() => (
            'a',
            json!({"toolCallId": delta.tool_call_id, "result": delta.result}),
        ),
        ProtocolEvent::ToolCall(delta) if delta.args_text_delta.is_some() => (
            'c',
            json!({"toolCallId": delta.tool_call_id, "argsTextDelta": delta.args_text_delta}),
        ),
        ProtocolEvent::ToolCall(_) => ('9', event.to_value()),
        ProtocolEvent::FinishMessage(_) => ('d', event.to_value()),
        ProtocolEvent::FinishStep(_) => ('e', event.to_value()),
        ProtocolEvent::StartStep(_) => ('f', event.to_value()),
        ProtocolEvent::Reasoning(_) => ('g', event.to_value()),
        ProtocolEvent::Source(_) => ('h', event.to_value()),
        ProtocolEvent::ReasoningSignature(_) => ('j', event.to_value()),
        ProtocolEvent::File(_) => ('k', event.to_value()),
    };
    Some(format!("{code}:{value}"))
}

fn tool_call_delta(value: &Value) -> Option<ToolCallDelta> {
    let mut delta = ToolCallDelta::new(value.get("toolCallId")?.as_str()?);
    delta.tool_name = value
        .get("toolName")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(delta)
}

/// Text payloads are JSON strings. Servers occasionally emit broken
/// escaping, so fall back to stripping the surrounding quotes.
fn decode_text_payload(payload: &str) -> String {
    if let Ok(Value::String(text)) = serde_json::from_str::<Value>(payload) {
        return text;
    }
    log::debug!("Text payload is not a JSON string, using literal fallback");
    let trimmed = payload.trim();
    let inner = trimmed.strip_prefix('"').unwrap_or(trimmed);
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    inner.replace("\\n", "\n").replace("\\\"", "\"")
}
