//! Rendering events back to wire lines.

use serde_json::json;

use crate::event::ProtocolEvent;
use crate::legacy::encode_legacy;

/// Render an event as a `data: {"type":..,"value":..}` line, newline terminated.
pub fn encode_data_line(event: &ProtocolEvent) -> String {
    let line = json!({
        "type": event.type_name(),
        "value": event.to_value(),
    });
    format!("data: {line}\n")
}

/// Render an event in the legacy `code:payload` form, newline terminated.
pub fn encode_legacy_line(event: &ProtocolEvent) -> Option<String> {
    encode_legacy(event).map(|line| format!("{line}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line_shape() {
        let line = encode_data_line(&ProtocolEvent::Text("Hello".to_string()));
        assert_eq!(line, "data: {\"type\":\"text\",\"value\":\"Hello\"}\n");
    }
}
