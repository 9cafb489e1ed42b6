// SettingsManager Service
// Handles client settings persistence

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::models::ClientSettings;
use crate::services::secret_store::SecretStore;

/// Fields in settings.json (camelCase) encrypted at rest
const SENSITIVE_FIELDS: &[&str] = &["password", "sessionCookie"];

/// Environment variables that override individual settings
pub const ENV_SERVER_URL: &str = "RELAY_CONSOLE_SERVER_URL";
pub const ENV_USERNAME: &str = "RELAY_CONSOLE_USERNAME";
pub const ENV_PASSWORD: &str = "RELAY_CONSOLE_PASSWORD";
pub const ENV_SESSION: &str = "RELAY_CONSOLE_SESSION";
pub const ENV_LOG_LEVEL: &str = "RELAY_CONSOLE_LOG_LEVEL";

/// Manages client settings storage and retrieval
pub struct SettingsManager {
    settings_path: PathBuf,
    secrets: SecretStore,
    cache: RwLock<Option<ClientSettings>>,
}

impl SettingsManager {
    /// Create a new SettingsManager with the given data directory
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join("settings.json"),
            secrets: SecretStore::new(data_dir),
            cache: RwLock::new(None),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, or write and return defaults if not found
    pub fn load(&self) -> Result<ClientSettings, String> {
        if let Ok(cache) = self.cache.read() {
            if let Some(ref settings) = *cache {
                return Ok(settings.clone());
            }
        }

        let settings = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings: {e}"))?;

            let mut user_value: Value = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            let had_plaintext = self.decrypt_sensitive_fields(&mut user_value);

            let defaults_value = serde_json::to_value(ClientSettings::default())
                .map_err(|e| format!("Failed to build default settings: {e}"))?;
            let changed = merge_missing_settings(&mut user_value, &defaults_value);

            let settings: ClientSettings = serde_json::from_value(user_value)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            // rewrite to add new keys and encrypt hand-edited secrets
            if changed || had_plaintext {
                self.save_internal(&settings)?;
            }

            settings
        } else {
            log::info!("No settings at {:?}, writing defaults", self.settings_path);
            let defaults = ClientSettings::default();
            self.save_internal(&defaults)?;
            defaults
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, settings: &ClientSettings) -> Result<(), String> {
        self.save_internal(settings)?;

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(())
    }

    fn save_internal(&self, settings: &ClientSettings) -> Result<(), String> {
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }

        let mut value = serde_json::to_value(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        self.encrypt_sensitive_fields(&mut value);

        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(&self.settings_path, content)
            .map_err(|e| format!("Failed to write settings: {e}"))
    }

    /// Decrypt sensitive fields in place. Returns true if any non-empty field was stored in plaintext.
    fn decrypt_sensitive_fields(&self, value: &mut Value) -> bool {
        let mut plaintext = false;
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if !SecretStore::is_encrypted(val) {
                        plaintext |= !val.is_empty();
                        continue;
                    }
                    match self.secrets.decrypt(val) {
                        Ok(decrypted) => {
                            map.insert(field.to_string(), Value::String(decrypted));
                        }
                        Err(e) => {
                            log::warn!("Failed to decrypt settings field '{field}': {e}");
                            map.insert(field.to_string(), Value::String(String::new()));
                        }
                    }
                }
            }
        }
        plaintext
    }

    fn encrypt_sensitive_fields(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if val.is_empty() || SecretStore::is_encrypted(val) {
                        continue;
                    }
                    match self.secrets.encrypt(val) {
                        Ok(encrypted) => {
                            map.insert(field.to_string(), Value::String(encrypted));
                        }
                        Err(e) => {
                            log::warn!("Failed to encrypt settings field '{field}': {e}");
                        }
                    }
                }
            }
        }
    }
}

/// Apply environment overrides on top of loaded settings
pub fn apply_env_overrides(settings: &mut ClientSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

fn apply_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENV_SERVER_URL) {
        log::debug!("Server URL overridden by {ENV_SERVER_URL}");
        settings.server_url = url;
    }
    if let Some(username) = get(ENV_USERNAME) {
        settings.username = username;
    }
    if let Some(password) = get(ENV_PASSWORD) {
        settings.password = password;
    }
    if let Some(session) = get(ENV_SESSION) {
        settings.session_cookie = session;
    }
    if let Some(level) = get(ENV_LOG_LEVEL) {
        settings.log_level = level;
    }
}

fn merge_missing_settings(target: &mut Value, defaults: &Value) -> bool {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(defaults_map)) => {
            let mut changed = false;
            for (key, default_value) in defaults_map {
                match target_map.get_mut(key) {
                    Some(target_value) => {
                        if merge_missing_settings(target_value, default_value) {
                            changed = true;
                        }
                    }
                    None => {
                        target_map.insert(key.clone(), default_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}
