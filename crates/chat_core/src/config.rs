use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::paths::config_json_path;
use crate::protocol::StreamProtocol;

pub const DEFAULT_API: &str = "http://localhost:3000/api/chat";
pub const DEFAULT_CONTINUATION_HEADER: &str = "x-continue-message-id";
pub const DEFAULT_PERSIST_INTERVAL_MS: u64 = 1000;

const CONFIG_FILE_PATH: &str = "chat.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_api")]
    pub api: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream_protocol: StreamProtocol,
    /// Extra request headers sent with every stream request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Extra JSON fields merged into every request body
    #[serde(default)]
    pub body: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_continuation_header")]
    pub continuation_header: String,
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,
    /// How long an aborted stream may wait for an already in-flight chunk
    #[serde(default)]
    pub abort_grace_ms: u64,
    /// Whether reasoning parts are included in request history
    #[serde(default)]
    pub send_reasoning: bool,
}

fn default_api() -> String {
    DEFAULT_API.to_string()
}

fn default_continuation_header() -> String {
    DEFAULT_CONTINUATION_HEADER.to_string()
}

fn default_persist_interval_ms() -> u64 {
    DEFAULT_PERSIST_INTERVAL_MS
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api: default_api(),
            model: None,
            stream_protocol: StreamProtocol::default(),
            headers: HashMap::new(),
            body: serde_json::Map::new(),
            continuation_header: default_continuation_header(),
            persist_interval_ms: DEFAULT_PERSIST_INTERVAL_MS,
            abort_grace_ms: 0,
            send_reasoning: false,
        }
    }
}

impl ChatConfig {
    /// Load `config.json` from the app dir, falling back to `./chat.toml`,
    /// then apply environment overrides. Unreadable files are skipped.
    pub fn new() -> Self {
        let mut config = ChatConfig::default();

        let json_path = config_json_path();
        let mut loaded = false;
        if json_path.exists() {
            match Self::load_from(&json_path) {
                Ok(file_config) => {
                    config = file_config;
                    loaded = true;
                }
                Err(e) => log::warn!("Ignoring config at {}: {:#}", json_path.display(), e),
            }
        }

        if !loaded && Path::new(CONFIG_FILE_PATH).exists() {
            match Self::load_from(Path::new(CONFIG_FILE_PATH)) {
                Ok(file_config) => config = file_config,
                Err(e) => log::warn!("Ignoring config at {}: {:#}", CONFIG_FILE_PATH, e),
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Parse a config file; `.toml` files are read as TOML, anything else as JSON.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON in {}", path.display()))
        }
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api) = lookup("CHAT_API") {
            self.api = api;
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            self.model = Some(model);
        }
        if let Some(protocol) = lookup("CHAT_STREAM_PROTOCOL") {
            match protocol.parse() {
                Ok(protocol) => self.stream_protocol = protocol,
                Err(e) => log::warn!("Ignoring CHAT_STREAM_PROTOCOL: {}", e),
            }
        }
        if let Some(interval) = lookup("CHAT_PERSIST_INTERVAL_MS") {
            match interval.trim().parse() {
                Ok(ms) => self.persist_interval_ms = ms,
                Err(e) => log::warn!("Ignoring CHAT_PERSIST_INTERVAL_MS={}: {}", interval, e),
            }
        }
        if let Some(grace) = lookup("CHAT_ABORT_GRACE_MS") {
            match grace.trim().parse() {
                Ok(ms) => self.abort_grace_ms = ms,
                Err(e) => log::warn!("Ignoring CHAT_ABORT_GRACE_MS={}: {}", grace, e),
            }
        }
        if let Some(send_reasoning) = lookup("CHAT_SEND_REASONING") {
            self.send_reasoning = parse_bool_env(&send_reasoning);
        }
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    pub fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.abort_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_bool_env_true_values() {
        for value in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert!(parse_bool_env(value), "value {value:?} should be true");
        }
    }

    #[test]
    fn parse_bool_env_false_values() {
        for value in ["0", "false", "no", "off", "", "  "] {
            assert!(!parse_bool_env(value), "value {value:?} should be false");
        }
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = ChatConfig::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("CHAT_MODEL", "gpt-4o"),
            ("CHAT_STREAM_PROTOCOL", "text"),
            ("CHAT_PERSIST_INTERVAL_MS", "250"),
            ("CHAT_ABORT_GRACE_MS", "not-a-number"),
        ]);
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.stream_protocol, StreamProtocol::Text);
        assert_eq!(config.persist_interval(), Duration::from_millis(250));
        assert_eq!(config.abort_grace_ms, 0);
    }

    #[test]
    fn load_toml_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "api = \"http://example.test/chat\"\nmodel = \"m1\"").unwrap();

        let config = ChatConfig::load_from(file.path()).unwrap();
        assert_eq!(config.api, "http://example.test/chat");
        assert_eq!(config.model.as_deref(), Some("m1"));
        assert_eq!(config.continuation_header, DEFAULT_CONTINUATION_HEADER);
        assert_eq!(config.stream_protocol, StreamProtocol::Data);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(ChatConfig::load_from(file.path()).is_err());
    }
}
