//! MessageAssembler - folds protocol events into message values
//!
//! `apply` never mutates the message it is given; every event yields a new
//! `Message` for the tree to upsert. Running totals live in the assembler,
//! so a replayed event (same or older sequence number) changes nothing.

use std::collections::HashMap;

use chat_core::{Message, MessagePart, ToolInvocation, ToolInvocationState};
use serde_json::Value;
use stream_protocol::{ProtocolEvent, ToolCallDelta, Usage};

/// A protocol event tagged with its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: ProtocolEvent,
}

/// Lifecycle markers seen so far. They never touch message content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepSummary {
    /// `messageId` announced by the first `start_step`.
    pub message_id: Option<String>,
    pub steps_started: usize,
    pub steps_finished: usize,
    /// Set by the last `finish_step`: more output for this message follows.
    pub is_continued: bool,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub message_finished: bool,
}

#[derive(Debug, Default)]
pub struct MessageAssembler {
    next_seq: u64,
    last_applied: Option<u64>,
    text: String,
    reasoning: Option<String>,
    tool_args_text: HashMap<String, String>,
    steps: StepSummary,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue assembling into an existing message: running totals start
    /// from what the message already holds.
    pub fn resume(message: &Message) -> Self {
        Self {
            text: message.content.clone(),
            reasoning: message.reasoning().map(str::to_string),
            ..Self::default()
        }
    }

    /// Tag an event with the next sequence number.
    pub fn sequence(&mut self, event: ProtocolEvent) -> SequencedEvent {
        let seq = self.next_seq;
        self.next_seq += 1;
        SequencedEvent { seq, event }
    }

    /// Sequence and apply in one step.
    pub fn push(&mut self, current: &Message, event: ProtocolEvent) -> Message {
        let event = self.sequence(event);
        self.apply(current, &event)
    }

    /// Fold one event into `current`, returning the updated message.
    pub fn apply(&mut self, current: &Message, event: &SequencedEvent) -> Message {
        if self.last_applied.is_some_and(|last| event.seq <= last) {
            tracing::debug!(
                message_id = %current.id,
                seq = event.seq,
                "MessageAssembler: skipping already applied event"
            );
            return current.clone();
        }
        self.last_applied = Some(event.seq);
        self.next_seq = self.next_seq.max(event.seq + 1);

        let mut next = current.clone();
        match &event.event {
            ProtocolEvent::Text(delta) => self.apply_text(&mut next, delta),
            ProtocolEvent::Reasoning(delta) => self.apply_reasoning(&mut next, delta),
            ProtocolEvent::ReasoningSignature(signature) => set_signature(&mut next, signature),
            ProtocolEvent::ToolCall(delta) => self.apply_tool_call(&mut next, delta),
            ProtocolEvent::Source(source) => {
                let existing = next.parts.iter_mut().find_map(|part| match part {
                    MessagePart::Source { source: s } if s.id == source.id => Some(s),
                    _ => None,
                });
                match existing {
                    Some(slot) => *slot = source.clone(),
                    None => next.parts.push(MessagePart::Source {
                        source: source.clone(),
                    }),
                }
            }
            ProtocolEvent::Annotations(value) => {
                for item in flatten(value) {
                    next.parts.push(MessagePart::annotation(item));
                }
            }
            ProtocolEvent::Data(value) => {
                for item in flatten(value) {
                    next.parts.push(MessagePart::data(item));
                }
            }
            ProtocolEvent::File(file) => next.parts.push(MessagePart::File {
                mime_type: file.mime_type.clone(),
                url: file.url.clone(),
                data: file.data.clone(),
            }),
            ProtocolEvent::StartStep(step) => {
                self.steps.steps_started += 1;
                if self.steps.message_id.is_none() {
                    self.steps.message_id = step.message_id.clone();
                }
            }
            ProtocolEvent::FinishStep(step) => {
                self.steps.steps_finished += 1;
                self.steps.is_continued = step.is_continued;
                if step.finish_reason.is_some() {
                    self.steps.finish_reason = step.finish_reason.clone();
                }
                if step.usage.is_some() {
                    self.steps.usage = step.usage.clone();
                }
            }
            ProtocolEvent::FinishMessage(finish) => {
                self.steps.message_finished = true;
                if finish.finish_reason.is_some() {
                    self.steps.finish_reason = finish.finish_reason.clone();
                }
                if finish.usage.is_some() {
                    self.steps.usage = finish.usage.clone();
                }
            }
            ProtocolEvent::Error(error) => {
                tracing::debug!(
                    message_id = %current.id,
                    error = %error,
                    "MessageAssembler: error event carries no content"
                );
            }
        }
        next.normalized()
    }

    pub fn steps(&self) -> &StepSummary {
        &self.steps
    }

    /// Accumulated text so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    fn apply_text(&mut self, message: &mut Message, delta: &str) {
        self.text.push_str(delta);
        message.content = self.text.clone();

        // Exactly one running text part: keep the first, drop strays.
        let total = &self.text;
        let mut seen = false;
        message.parts.retain_mut(|part| match part {
            MessagePart::Text { text } if !seen => {
                seen = true;
                *text = total.clone();
                true
            }
            MessagePart::Text { .. } => false,
            _ => true,
        });
        if !seen {
            message.parts.push(MessagePart::text(total.clone()));
        }
    }

    fn apply_reasoning(&mut self, message: &mut Message, delta: &str) {
        let joined = match self.reasoning.take() {
            Some(previous) if !previous.is_empty() => format!("{previous}\n{delta}"),
            _ => delta.to_string(),
        };

        let existing = message.parts.iter_mut().find_map(|part| match part {
            MessagePart::Reasoning { reasoning, .. } => Some(reasoning),
            _ => None,
        });
        match existing {
            Some(reasoning) => *reasoning = joined.clone(),
            None => message.parts.push(MessagePart::reasoning(joined.clone())),
        }
        self.reasoning = Some(joined);
    }

    fn apply_tool_call(&mut self, message: &mut Message, delta: &ToolCallDelta) {
        let position = message.parts.iter().position(|part| {
            matches!(part, MessagePart::ToolInvocation { tool_invocation }
                if tool_invocation.tool_call_id == delta.tool_call_id)
        });
        let index = match position {
            Some(index) => index,
            None => {
                message.parts.push(MessagePart::ToolInvocation {
                    tool_invocation: ToolInvocation::pending(
                        delta.tool_call_id.clone(),
                        delta.tool_name.clone().unwrap_or_default(),
                    ),
                });
                message.parts.len() - 1
            }
        };
        let MessagePart::ToolInvocation { tool_invocation } = &mut message.parts[index] else {
            return;
        };

        if let Some(name) = delta.tool_name.as_deref().filter(|name| !name.is_empty()) {
            tool_invocation.tool_name = name.to_string();
        }
        if let Some(args) = &delta.args {
            merge_args(&mut tool_invocation.args, args);
        }
        if let Some(fragment) = &delta.args_text_delta {
            let buffer = self
                .tool_args_text
                .entry(delta.tool_call_id.clone())
                .or_default();
            buffer.push_str(fragment);
            // Partial JSON stays buffered until it parses.
            if let Ok(parsed) = serde_json::from_str::<Value>(buffer) {
                merge_args(&mut tool_invocation.args, &parsed);
            }
        }
        if let Some(result) = &delta.result {
            tool_invocation.state = ToolInvocationState::Result;
            tool_invocation.result = Some(result.clone());
        }
        if let Some(error) = &delta.error {
            tool_invocation.state = ToolInvocationState::Error;
            tool_invocation.error = Some(error.clone());
        }
    }
}

fn set_signature(message: &mut Message, value: &str) {
    let existing = message.parts.iter_mut().find_map(|part| match part {
        MessagePart::Reasoning { signature, .. } => Some(signature),
        _ => None,
    });
    match existing {
        Some(signature) => *signature = Some(value.to_string()),
        None => message.parts.push(MessagePart::Reasoning {
            reasoning: String::new(),
            signature: Some(value.to_string()),
        }),
    }
}

/// Later non-empty values win; object fragments merge key by key.
fn merge_args(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(fragment)) => {
            for (key, value) in fragment {
                if !is_empty_value(value) || !existing.contains_key(key) {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
        (target, incoming) if !is_empty_value(incoming) => *target = incoming.clone(),
        _ => {}
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn flatten(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stream_protocol::{FinishStep, StartStep};

    fn assistant() -> Message {
        Message::assistant(Some("gpt-4o".to_string())).with_id("a1")
    }

    #[test]
    fn text_events_coalesce_into_one_part() {
        let mut assembler = MessageAssembler::new();
        let mut message = assistant();
        for delta in ["Hel", "lo", "!"] {
            message = assembler.push(&message, ProtocolEvent::Text(delta.to_string()));
        }
        assert_eq!(message.content, "Hello!");
        assert_eq!(message.text_part_count(), 1);
        assert_eq!(message.text_from_parts(), "Hello!");
    }

    #[test]
    fn apply_does_not_touch_input() {
        let mut assembler = MessageAssembler::new();
        let before = assistant();
        let after = assembler.push(&before, ProtocolEvent::Text("x".to_string()));
        assert!(before.content.is_empty());
        assert_eq!(after.content, "x");
    }

    #[test]
    fn replayed_event_is_a_no_op() {
        let mut assembler = MessageAssembler::new();
        let event = assembler.sequence(ProtocolEvent::Text("Hi".to_string()));
        let once = assembler.apply(&assistant(), &event);
        let twice = assembler.apply(&once, &event);
        assert_eq!(twice.content, "Hi");
        assert_eq!(twice, once);
    }

    #[test]
    fn reasoning_chunks_join_with_newline() {
        let mut assembler = MessageAssembler::new();
        let mut message = assistant();
        message = assembler.push(&message, ProtocolEvent::Reasoning("first".to_string()));
        message = assembler.push(&message, ProtocolEvent::Reasoning("second".to_string()));
        message = assembler.push(
            &message,
            ProtocolEvent::ReasoningSignature("sig".to_string()),
        );
        assert_eq!(message.reasoning(), Some("first\nsecond"));
        assert!(message.parts.iter().any(|part| matches!(
            part,
            MessagePart::Reasoning { signature: Some(s), .. } if s == "sig"
        )));
    }

    #[test]
    fn tool_calls_tracked_independently() {
        let mut assembler = MessageAssembler::new();
        let mut message = assistant();

        let mut first = ToolCallDelta::new("t1");
        first.tool_name = Some("search".to_string());
        first.args = Some(json!({"q": "rust", "limit": 5}));
        message = assembler.push(&message, ProtocolEvent::ToolCall(first));

        let mut second = ToolCallDelta::new("t2");
        second.tool_name = Some("weather".to_string());
        second.args_text_delta = Some("{\"city\":".to_string());
        message = assembler.push(&message, ProtocolEvent::ToolCall(second));

        let mut more_args = ToolCallDelta::new("t2");
        more_args.args_text_delta = Some("\"Oslo\"}".to_string());
        message = assembler.push(&message, ProtocolEvent::ToolCall(more_args));

        let mut update = ToolCallDelta::new("t1");
        update.args = Some(json!({"q": "", "limit": 10}));
        update.result = Some(json!(["hit"]));
        message = assembler.push(&message, ProtocolEvent::ToolCall(update));

        let mut failure = ToolCallDelta::new("t2");
        failure.error = Some("timeout".to_string());
        message = assembler.push(&message, ProtocolEvent::ToolCall(failure));

        let t1 = message.tool_invocation("t1").unwrap();
        assert_eq!(t1.args, json!({"q": "rust", "limit": 10}));
        assert_eq!(t1.state, ToolInvocationState::Result);

        let t2 = message.tool_invocation("t2").unwrap();
        assert_eq!(t2.tool_name, "weather");
        assert_eq!(t2.args, json!({"city": "Oslo"}));
        assert_eq!(t2.state, ToolInvocationState::Error);
        assert_eq!(message.tool_invocations().len(), 2);
    }

    #[test]
    fn data_and_annotations_become_parts() {
        let mut assembler = MessageAssembler::new();
        let mut message = assistant();
        message = assembler.push(&message, ProtocolEvent::Data(json!([{"a": 1}, {"b": 1}])));
        message = assembler.push(&message, ProtocolEvent::Annotations(json!({"b": 2})));

        assert_eq!(message.parts.len(), 3);
        assert_eq!(message.annotations(), vec![&json!({"b": 2})]);
        assert_eq!(message.data()["a"], 1);
        assert_eq!(message.data()["b"], 2);
    }

    #[test]
    fn lifecycle_markers_leave_content_alone() {
        let mut assembler = MessageAssembler::new();
        let message = assistant();
        let after = assembler.push(
            &message,
            ProtocolEvent::StartStep(StartStep {
                message_id: Some("srv-1".to_string()),
            }),
        );
        let after = assembler.push(
            &after,
            ProtocolEvent::FinishStep(FinishStep {
                finish_reason: Some("length".to_string()),
                usage: None,
                is_continued: true,
            }),
        );
        assert_eq!(after, message);
        assert_eq!(assembler.steps().message_id.as_deref(), Some("srv-1"));
        assert!(assembler.steps().is_continued);
        assert_eq!(assembler.steps().finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn resume_appends_to_existing_text() {
        let mut message = assistant();
        message.content = "Once upon".to_string();
        message.parts = vec![MessagePart::text("Once upon")];

        let mut assembler = MessageAssembler::resume(&message);
        let message = assembler.push(&message, ProtocolEvent::Text(" a time".to_string()));
        assert_eq!(message.content, "Once upon a time");
        assert_eq!(message.text_part_count(), 1);
    }
}
