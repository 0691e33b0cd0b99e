//! Decoder output folded through the assembler

use chat_core::{Message, MessagePart, StreamProtocol, ToolInvocationState};
use context_manager::MessageAssembler;
use stream_protocol::{ProtocolEvent, StreamDecoder};

fn assemble(protocol: StreamProtocol, chunks: &[&str]) -> (Message, MessageAssembler) {
    let mut decoder = StreamDecoder::new(protocol);
    let mut assembler = MessageAssembler::new();
    let mut message = Message::assistant(Some("test-model".to_string()));

    for chunk in chunks {
        for event in decoder.feed(chunk.as_bytes()).expect("valid chunk") {
            message = assembler.push(&message, event);
        }
    }
    for event in decoder.finish() {
        message = assembler.push(&message, event);
    }
    (message, assembler)
}

#[test]
fn test_text_protocol_chunks_assemble() {
    let (message, _) = assemble(StreamProtocol::Text, &["Hel", "lo, ", "world!"]);
    assert_eq!(message.content, "Hello, world!");
    assert_eq!(message.text_part_count(), 1);
    assert_eq!(message.parts, vec![MessagePart::text("Hello, world!")]);
}

#[test]
fn test_empty_text_response_still_has_text_part() {
    let (message, _) = assemble(StreamProtocol::Text, &[]);
    assert_eq!(message.content, "");
    assert_eq!(message.parts, vec![MessagePart::text("")]);
}

#[test]
fn test_data_protocol_full_message() {
    let body = [
        "f:{\"messageId\":\"srv-42\"}\n",
        "data: {\"type\":\"reasoning\",\"value\":\"Look up\"}\ng:\"the docs\"\n",
        "0:\"Here\"\n0:\" you go\"\n",
        "data: {\"type\":\"tool_call\",\"value\":{\"toolCallId\":\"t1\",\"toolName\":\"search\",\"args\":{\"q\":\"x\"}}}\n",
        "a:{\"toolCallId\":\"t1\",\"result\":\"found\"}\n",
        "h:{\"id\":\"s1\",\"url\":\"https://docs.rs\"}\n",
        "e:{\"finishReason\":\"stop\",\"isContinued\":false}\n",
        "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":3,\"completionTokens\":4}}",
    ];
    let (message, assembler) = assemble(StreamProtocol::Data, &body);

    assert_eq!(message.content, "Here you go");
    assert_eq!(message.reasoning(), Some("Look up\nthe docs"));
    let tool = message.tool_invocation("t1").expect("tool invocation");
    assert_eq!(tool.state, ToolInvocationState::Result);
    assert_eq!(tool.tool_name, "search");
    assert_eq!(message.sources().len(), 1);
    assert_eq!(message.text_part_count(), 1);

    let steps = assembler.steps();
    assert_eq!(steps.message_id.as_deref(), Some("srv-42"));
    assert!(steps.message_finished);
    assert_eq!(steps.finish_reason.as_deref(), Some("stop"));
    assert_eq!(steps.usage.as_ref().and_then(|u| u.completion_tokens), Some(4));
}

#[test]
fn test_raw_lines_are_kept_in_content() {
    let (message, _) = assemble(StreamProtocol::Data, &["0:\"a\"\nnot a protocol line\n"]);
    assert_eq!(message.content, "anot a protocol line");
}

#[test]
fn test_replay_of_whole_stream_is_ignored() {
    let mut assembler = MessageAssembler::new();
    let events: Vec<_> = ["one ", "two"]
        .iter()
        .map(|t| assembler.sequence(ProtocolEvent::Text(t.to_string())))
        .collect();

    let mut message = Message::assistant(None);
    for event in events.iter().chain(events.iter()) {
        message = assembler.apply(&message, event);
    }
    assert_eq!(message.content, "one two");
}
