use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::classifier::DEFAULT_CLASSIFY_TIMEOUT;
use crate::core::conversation::ConversationSettings;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8787/api/chat";
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Keys accepted by `spoilerfree set` and `spoilerfree unset`.
pub const SETTABLE_KEYS: [&str; 7] = [
    "relay-url",
    "danger-mode",
    "stream",
    "classify-timeout",
    "model",
    "base-url",
    "bind",
];

/// Provider credentials, in lookup order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["SPOILERFREE_API_KEY", "OPENAI_API_KEY"];
pub const BASE_URL_ENV_VAR: &str = "OPENAI_BASE_URL";

/// Upstream chat-completions provider used by the relay endpoint.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API (e.g., "https://api.openai.com/v1")
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Socket address the relay endpoint listens on
    pub bind: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Relay endpoint the chat client talks to
    pub relay_url: Option<String>,
    /// Start conversations with the permissive prompt
    pub danger_mode: Option<bool>,
    /// Ask the relay for incremental text instead of a single JSON reply
    pub stream: Option<bool>,
    /// Upper bound on one classification request, in seconds
    pub classify_timeout_secs: Option<u64>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// A `set`/`unset` request that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    UnknownKey(String),
    Invalid { key: String, value: String },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (expected one of: {})",
                SETTABLE_KEYS.join(", ")
            ),
            ValueError::Invalid { key, value } => {
                write!(f, "Invalid value for {key}: {value}")
            }
        }
    }
}

impl StdError for ValueError {}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn relay_url(&self) -> &str {
        self.relay_url.as_deref().unwrap_or(DEFAULT_RELAY_URL)
    }

    pub fn bind_address(&self) -> &str {
        self.server.bind.as_deref().unwrap_or(DEFAULT_BIND)
    }

    pub fn model(&self) -> &str {
        self.provider.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn classify_timeout(&self) -> Duration {
        self.classify_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLASSIFY_TIMEOUT)
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            stream: self.stream.unwrap_or(true),
            danger_mode: self.danger_mode.unwrap_or(false),
        }
    }

    /// Sets one value by its command-line key.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ValueError> {
        let value = value.trim();
        let invalid = || ValueError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        };
        if value.is_empty() {
            return Err(invalid());
        }

        match key {
            "relay-url" => self.relay_url = Some(value.to_string()),
            "danger-mode" => self.danger_mode = Some(value.parse().map_err(|_| invalid())?),
            "stream" => self.stream = Some(value.parse().map_err(|_| invalid())?),
            "classify-timeout" => {
                let secs: u64 = value.parse().map_err(|_| invalid())?;
                if secs == 0 {
                    return Err(invalid());
                }
                self.classify_timeout_secs = Some(secs);
            }
            "model" => self.provider.model = Some(value.to_string()),
            "base-url" => self.provider.base_url = Some(value.to_string()),
            "bind" => self.server.bind = Some(value.to_string()),
            _ => return Err(ValueError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Clears one value so its default applies again.
    pub fn unset_value(&mut self, key: &str) -> Result<(), ValueError> {
        match key {
            "relay-url" => self.relay_url = None,
            "danger-mode" => self.danger_mode = None,
            "stream" => self.stream = None,
            "classify-timeout" => self.classify_timeout_secs = None,
            "model" => self.provider.model = None,
            "base-url" => self.provider.base_url = None,
            "bind" => self.server.bind = None,
            _ => return Err(ValueError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Resolves the provider base URL. The environment wins over the file.
    pub fn provider_base_url(&self) -> String {
        let from_env = std::env::var(BASE_URL_ENV_VAR).ok();
        resolve_base_url(from_env.as_deref(), self.provider.base_url.as_deref())
    }
}

pub(crate) fn resolve_base_url(from_env: Option<&str>, from_config: Option<&str>) -> String {
    from_env
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .or_else(|| from_config.map(str::trim).filter(|url| !url.is_empty()))
        .unwrap_or(DEFAULT_PROVIDER_BASE_URL)
        .trim_end_matches('/')
        .to_string()
}

/// Looks up the provider API key in the environment.
pub fn resolve_api_key() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
