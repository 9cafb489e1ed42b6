// Settings Model
// Client configuration

use serde::{Deserialize, Serialize};

use super::start_request::DEFAULT_CREDENTIAL_DESTINATIONS;

fn default_server_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_credential_destinations() -> Vec<String> {
    DEFAULT_CREDENTIAL_DESTINATIONS
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn default_ack_timeout_secs() -> u64 {
    10
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_retention_days() -> u32 {
    14
}

fn default_preview_enabled() -> bool {
    true
}

/// Predefined input in the source catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEntry {
    /// Display name, also sent as the stream's source name
    pub name: String,

    /// Ingest locator handed to the relay
    pub input: String,

    /// HLS locator used for preview, if the source has one
    #[serde(default)]
    pub preview: Option<String>,
}

/// Preview playback configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSettings {
    #[serde(default = "default_preview_enabled")]
    pub enabled: bool,

    /// Explicit ffplay path; looked up on PATH when empty
    #[serde(default)]
    pub ffplay_path: String,

    /// Decode without opening a window
    #[serde(default)]
    pub headless: bool,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            enabled: default_preview_enabled(),
            ffplay_path: String::new(),
            headless: false,
        }
    }
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    // Relay backend
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Pre-established session cookie header; skips login when set
    #[serde(default)]
    pub session_cookie: String,

    // Realtime channel
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    // Start-stream validation
    #[serde(default = "default_credential_destinations")]
    pub credential_destinations: Vec<String>,

    // Source catalog
    #[serde(default)]
    pub sources: Vec<SourceEntry>,

    // Preview
    #[serde(default)]
    pub preview: PreviewSettings,

    // Logging
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl ClientSettings {
    /// Find a catalog entry by name (case-insensitive)
    pub fn find_source(&self, name: &str) -> Option<&SourceEntry> {
        self.sources
            .iter()
            .find(|source| source.name.eq_ignore_ascii_case(name))
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            username: String::new(),
            password: String::new(),
            session_cookie: String::new(),
            ack_timeout_secs: default_ack_timeout_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            credential_destinations: default_credential_destinations(),
            sources: Vec::new(),
            preview: PreviewSettings::default(),
            log_level: default_log_level(),
            log_retention_days: default_log_retention_days(),
        }
    }
}
