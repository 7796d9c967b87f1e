//! Configuration for the chat client.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::errors::{ChatError, ChatResult};
use crate::chat::ids::ModelId;

/// Default Ollama API host.
const DEFAULT_OLLAMA_HOST: &str = "127.0.0.1";
/// Default Ollama API port.
const DEFAULT_OLLAMA_PORT: u16 = 11_434;
/// Model selected before the first directory refresh.
const DEFAULT_MODEL: &str = "deepseek";
/// Default HTTP port for the browser-facing server.
const DEFAULT_PORT: u16 = 3000;

/// Environment variable for a custom Ollama URL (e.g., "http://192.168.1.20:11434").
pub const OLLAMA_URL_ENV: &str = "OLLAMA_CHAT_URL";
/// Environment variable for the initially selected model.
pub const MODEL_ENV: &str = "OLLAMA_CHAT_MODEL";
/// Environment variable for the `SQLite` database path.
pub const DB_PATH_ENV: &str = "OLLAMA_CHAT_DB";
/// Environment variable for the server port.
pub const PORT_ENV: &str = "OLLAMA_CHAT_PORT";
/// Environment variable for the conversation title length.
pub const TITLE_MAX_ENV: &str = "OLLAMA_CHAT_TITLE_MAX";

/// Top-level configuration for the chat client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL of the inference server.
    pub ollama_url: String,
    /// Model selected until the directory says otherwise.
    pub default_model: String,
    /// Path of the `SQLite` database holding the key-value storage.
    pub sqlite_path: PathBuf,
    /// Directory of static browser assets.
    pub static_dir: PathBuf,
    /// Port of the browser-facing server.
    pub port: u16,
    /// Maximum number of characters of a derived conversation title.
    pub title_max_chars: usize,
    /// Connection timeout towards the inference server.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Capacity of the coordinator event channel.
    pub event_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ollama_url: format!("http://{DEFAULT_OLLAMA_HOST}:{DEFAULT_OLLAMA_PORT}"),
            default_model: DEFAULT_MODEL.to_string(),
            sqlite_path: PathBuf::from("ollama_chat.sqlite"),
            static_dir: PathBuf::from("static"),
            port: DEFAULT_PORT,
            title_max_chars: 50,
            connect_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl ChatConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from the process environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Unparsable numeric values are ignored and keep their default.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(OLLAMA_URL_ENV) {
            config = config.with_ollama_url(url);
        }
        if let Some(model) = lookup(MODEL_ENV) {
            config = config.with_default_model(model);
        }
        if let Some(path) = lookup(DB_PATH_ENV) {
            config.sqlite_path = PathBuf::from(path);
        }
        if let Some(port) = lookup(PORT_ENV).and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Some(max) = lookup(TITLE_MAX_ENV).and_then(|m| m.parse().ok()) {
            config = config.with_title_max_chars(max);
        }
        config
    }

    /// Set the inference server URL.
    #[must_use]
    pub fn with_ollama_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_url = url.into();
        self
    }

    /// Set the initially selected model.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the maximum title length.
    #[must_use]
    pub const fn with_title_max_chars(mut self, max: usize) -> Self {
        self.title_max_chars = max;
        self
    }

    /// Ollama base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.ollama_url.trim_end_matches('/')
    }

    /// Validated initial model.
    ///
    /// # Errors
    /// Returns an error if the configured model name is invalid.
    pub fn default_model_id(&self) -> ChatResult<ModelId> {
        Ok(ModelId::new(&self.default_model)?)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        Url::parse(&self.ollama_url)?;

        if self.title_max_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "title_max_chars must be > 0".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(ChatError::InvalidConfig(
                "event_capacity must be > 0".to_string(),
            ));
        }

        self.default_model_id()?;
        Ok(())
    }
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
