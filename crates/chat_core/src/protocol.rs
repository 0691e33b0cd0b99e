use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire format of a streamed chat response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    /// Every chunk is raw text to append.
    Text,
    /// Line-oriented structured events (`data: {...}` or legacy `code:payload`).
    #[default]
    Data,
}

impl fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamProtocol::Text => write!(f, "text"),
            StreamProtocol::Data => write!(f, "data"),
        }
    }
}

impl FromStr for StreamProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(StreamProtocol::Text),
            "data" => Ok(StreamProtocol::Data),
            other => Err(format!("unknown stream protocol: {other}")),
        }
    }
}
