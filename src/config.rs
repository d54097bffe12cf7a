//! Server settings.
//!
//! Loaded from `settings.json` next to the binary (build.rs copies it there).
//! Every field has a default, so a partial file or no file at all still boots.
//! A handful of environment variables override the file.

use serde::Deserialize;
use std::{env, fs, io, path::Path, time::Duration};

pub const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_expiration_in_minutes: u32,
    pub default_admin_username: String,
    pub default_admin_password: String,
    pub completion: CompletionSettings,
}

/// Where natural-language parsing and coaching requests go.
/// No api_key means the assistant runs on its rule-based fallback only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            database_path: "tasks.redb".to_string(),
            jwt_secret: "change-me-before-deploying".to_string(),
            jwt_expiration_in_minutes: 24 * 60,
            default_admin_username: "admin".to_string(),
            default_admin_password: "admin".to_string(),
            completion: CompletionSettings::default(),
        }
    }
}

impl Default for CompletionSettings {
    fn default() -> Self {
        CompletionSettings {
            api_key: None,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            timeout_secs: 20,
        }
    }
}

impl CompletionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("cannot parse settings file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

impl Settings {
    /// Load settings from `TASKWISE_SETTINGS` or `settings.json`, then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load() -> Result<Settings, SettingsError> {
        let path = env::var("TASKWISE_SETTINGS").unwrap_or_else(|_| SETTINGS_FILENAME.to_string());
        let mut settings = if Path::new(&path).exists() {
            Settings::from_file(&path)?
        } else {
            tracing::warn!(%path, "settings file not found, using defaults");
            Settings::default()
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_file(path: &str) -> Result<Settings, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_string(),
            source,
        })?;
        Settings::from_json(&content).map_err(|source| SettingsError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Settings, serde_json::Error> {
        serde_json::from_str(content)
    }

    fn apply_env(&mut self) {
        if let Some(key) = env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()) {
            self.completion.api_key = Some(key);
        }
        if let Ok(endpoint) = env::var("OPENAI_BASE_URL") {
            self.completion.endpoint = endpoint;
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let s = Settings::from_json(r#"{ "port": 8080, "completion": { "model": "gpt-4o-mini" } }"#).unwrap();
        assert_eq!(s.port, 8080);
        assert_eq!(s.bind_address, "0.0.0.0");
        assert_eq!(s.completion.model, "gpt-4o-mini");
        assert_eq!(s.completion.timeout_secs, 20);
        assert!(s.completion.api_key.is_none());
    }

    #[test]
    fn empty_object_is_all_defaults() {
        let s = Settings::from_json("{}").unwrap();
        assert_eq!(s.database_path, "tasks.redb");
        assert_eq!(s.jwt_expiration_in_minutes, 1440);
        assert_eq!(s.socket_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn timeout_never_zero() {
        let mut c = CompletionSettings::default();
        c.timeout_secs = 0;
        assert_eq!(c.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(Settings::from_json("{ port: ").is_err());
    }
}
