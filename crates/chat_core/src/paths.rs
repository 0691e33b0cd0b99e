use std::path::PathBuf;

/// Application data directory (~/.branchchat)
pub fn app_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".branchchat")
}

/// config.json path
pub fn config_json_path() -> PathBuf {
    app_dir().join("config.json")
}

/// Default directory for persisted conversations
pub fn conversations_dir() -> PathBuf {
    app_dir().join("conversations")
}
