//! Chunk → event decoding with carry of partial lines.

use chat_core::StreamProtocol;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::event::ProtocolEvent;
use crate::legacy::{decode_legacy, split_legacy_line};

const DONE_SENTINEL: &str = "[DONE]";

/// Result of decoding one chunk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodeOutput {
    pub events: Vec<ProtocolEvent>,
    /// Trailing partial line to pass back as `carry` with the next chunk.
    pub remainder: String,
}

#[derive(Deserialize)]
struct TypedLine {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    value: Value,
}

/// Stateless chunk decoder. The caller owns the carry buffer; see
/// [`StreamDecoder`] for a wrapper that keeps it.
#[derive(Debug, Clone, Copy)]
pub struct WireDecoder {
    protocol: StreamProtocol,
}

impl WireDecoder {
    pub fn new(protocol: StreamProtocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> StreamProtocol {
        self.protocol
    }

    /// Decode `raw_chunk` appended to `carry`. Only complete lines produce
    /// events; the unterminated tail is returned as `remainder`.
    pub fn decode(&self, raw_chunk: &str, carry: &str) -> DecodeOutput {
        match self.protocol {
            StreamProtocol::Text => DecodeOutput {
                events: vec![ProtocolEvent::Text(format!("{carry}{raw_chunk}"))],
                remainder: String::new(),
            },
            StreamProtocol::Data => {
                let mut buffer = String::with_capacity(carry.len() + raw_chunk.len());
                buffer.push_str(carry);
                buffer.push_str(raw_chunk);

                let mut events = Vec::new();
                let mut start = 0usize;
                while let Some(rel) = buffer[start..].find('\n') {
                    let end = start + rel;
                    let line = buffer[start..end].strip_suffix('\r').unwrap_or(&buffer[start..end]);
                    if let Some(event) = self.decode_line(line) {
                        events.push(event);
                    }
                    start = end + 1;
                }

                DecodeOutput {
                    events,
                    remainder: buffer[start..].to_string(),
                }
            }
        }
    }

    /// Decode raw bytes. Fails only when the bytes are not valid UTF-8.
    pub fn decode_bytes(&self, raw_chunk: &[u8], carry: &str) -> Result<DecodeOutput, DecodeError> {
        let text = std::str::from_utf8(raw_chunk).map_err(|e| DecodeError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })?;
        Ok(self.decode(text, carry))
    }

    /// Treat a leftover carry as a final, complete line.
    pub fn flush(&self, carry: &str) -> Vec<ProtocolEvent> {
        match self.protocol {
            StreamProtocol::Text if carry.is_empty() => Vec::new(),
            StreamProtocol::Text => vec![ProtocolEvent::Text(carry.to_string())],
            StreamProtocol::Data => {
                let line = carry.strip_suffix('\r').unwrap_or(carry);
                self.decode_line(line).into_iter().collect()
            }
        }
    }

    /// Decode one complete line of the data protocol.
    ///
    /// SSE framing (blank lines, comments, `event:`/`id:`/`retry:` fields)
    /// and the `[DONE]` sentinel yield `None`. Lines matching neither the
    /// `data:` nor the legacy shape are kept verbatim as text.
    pub fn decode_line(&self, line: &str) -> Option<ProtocolEvent> {
        if line.trim().is_empty() || line.starts_with(':') {
            return None;
        }

        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            if payload.trim() == DONE_SENTINEL {
                return None;
            }
            return Some(
                serde_json::from_str::<TypedLine>(payload)
                    .ok()
                    .and_then(|typed| ProtocolEvent::from_typed_value(&typed.type_name, typed.value))
                    .unwrap_or_else(|| raw_line(line)),
            );
        }

        if ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
        {
            return None;
        }

        if let Some((code, payload)) = split_legacy_line(line) {
            return Some(decode_legacy(code, payload).unwrap_or_else(|| raw_line(line)));
        }

        Some(raw_line(line))
    }
}

fn raw_line(line: &str) -> ProtocolEvent {
    log::warn!("Unrecognised stream line kept as text: {:?}", line);
    ProtocolEvent::Text(line.to_string())
}

/// Stateful decoder for one response body.
///
/// Keeps the partial-line carry and any incomplete UTF-8 sequence split
/// across chunk boundaries.
#[derive(Debug)]
pub struct StreamDecoder {
    decoder: WireDecoder,
    carry: String,
    pending_bytes: Vec<u8>,
    emitted: usize,
}

impl StreamDecoder {
    pub fn new(protocol: StreamProtocol) -> Self {
        Self {
            decoder: WireDecoder::new(protocol),
            carry: String::new(),
            pending_bytes: Vec::new(),
            emitted: 0,
        }
    }

    pub fn protocol(&self) -> StreamProtocol {
        self.decoder.protocol()
    }

    /// Bytes of the current partial line.
    pub fn carry(&self) -> &str {
        &self.carry
    }

    /// Decode one transport chunk.
    ///
    /// Invalid UTF-8 discards this chunk and returns an error; the decoder
    /// stays usable for the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ProtocolEvent>, DecodeError> {
        let mut bytes = std::mem::take(&mut self.pending_bytes);
        bytes.extend_from_slice(chunk);

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end: keep it for the next chunk.
                let valid = e.valid_up_to();
                self.pending_bytes = bytes[valid..].to_vec();
                // Safe: the prefix was just validated.
                std::str::from_utf8(&bytes[..valid]).unwrap_or_default()
            }
            Err(e) => {
                return Err(DecodeError::InvalidUtf8 {
                    valid_up_to: e.valid_up_to(),
                });
            }
        };

        let output = self.decoder.decode(text, &self.carry);
        self.carry = output.remainder;
        self.emitted += output.events.len();
        Ok(output.events)
    }

    /// End of body: flush the carry as a final line. A text-protocol response
    /// that produced nothing yields one empty text event.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let carry = std::mem::take(&mut self.carry);
        if !self.pending_bytes.is_empty() {
            log::warn!(
                "Dropping {} bytes of incomplete UTF-8 at end of stream",
                self.pending_bytes.len()
            );
            self.pending_bytes.clear();
        }

        let mut events = self.decoder.flush(&carry);
        if events.is_empty() && self.emitted == 0 && self.protocol() == StreamProtocol::Text {
            events.push(ProtocolEvent::Text(String::new()));
        }
        self.emitted += events.len();
        events
    }
}
