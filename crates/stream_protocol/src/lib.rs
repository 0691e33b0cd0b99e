//! stream_protocol - Wire decoding for streamed chat responses
//!
//! Turns chunked response bodies into typed [`ProtocolEvent`]s. Two wire
//! formats are supported: `text` (every chunk is a text delta) and `data`
//! (line-oriented `data: {json}` lines plus the legacy `code:payload` form).

pub mod decoder;
pub mod encode;
pub mod error;
pub mod event;
pub mod legacy;

pub use decoder::{DecodeOutput, StreamDecoder, WireDecoder};
pub use encode::{encode_data_line, encode_legacy_line};
pub use error::DecodeError;
pub use event::{
    FilePayload, FinishMessage, FinishStep, ProtocolEvent, StartStep, ToolCallDelta, Usage,
};
