use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub database_url: String,
    /// Messages fetched per page during a full sync.
    pub page_size: i64,
    pub event_poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:mailcache.db?mode=rwc".to_string(),
            page_size: 50,
            event_poll_interval_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn load() -> Self {
        use std::fs;
        if let Ok(content) = fs::read_to_string("settings.toml") {
            if let Ok(config) = toml::from_str(&content) {
                return config;
            }
        }
        Self::default()
    }
}
