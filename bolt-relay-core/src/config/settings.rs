//! Settings configuration loaded from TOML files.
//!
//! Non-sensitive configuration lives in the XDG config directory
//! (`~/.config/bolt-relay/config.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# bolt-relay configuration file
# Located at: ~/.config/bolt-relay/config.toml
#
# Secrets (API keys) are loaded from environment variables:
#   - ANTHROPIC_API_KEY
#   - OPENAI_API_KEY / OPENAI_BASE_URL / OPENAI_MODEL
#   - LOCALAI_API_KEY / LOCALAI_API_URL / LOCALAI_MODEL
#   - SLACK_BOT_TOKEN

[preparation]
max_attempts = 12
backoff_base_ms = 5000
backoff_max_ms = 30000
# Deadline for a single begin or readiness call
call_timeout_ms = 30000
# Shell commands; `{resource}` is replaced with the repository name.
# begin_command = "codegen-index start {resource}"
# status_command = "codegen-index status {resource}"

[stream]
enabled = true
update_interval_ms = 500
poll_interval_ms = 100
placeholder = "⏳ Thinking..."

[logging]
level = "info"
"#;

/// Settings loaded from the TOML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Repository preparation settings
    #[serde(default)]
    pub preparation: PreparationSettings,

    /// Streamed reply delivery settings
    #[serde(default)]
    pub stream: StreamSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Repository preparation (polling + backoff) settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PreparationSettings {
    /// Number of readiness polls before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after the first poll; grows linearly with each poll
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single wait
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Deadline for one `begin` or readiness call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Command that triggers preparation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_command: Option<String>,

    /// Command that reports readiness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_command: Option<String>,
}

/// Streamed reply settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamSettings {
    /// Stream replies as incremental message edits
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum spacing between two message edits
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// How often the flush loop wakes up
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Text of the message posted before the first fragment arrives
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_attempts() -> u32 {
    12
}

fn default_backoff_base_ms() -> u64 {
    5_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_update_interval_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_placeholder() -> String {
    "⏳ Thinking...".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PreparationSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            begin_command: None,
            status_command: None,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            update_interval_ms: default_update_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            placeholder: default_placeholder(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        Self::load_from_path(&config_path)
    }

    /// Load settings from an explicit file path.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Get the configuration file path.
    ///
    /// `BOLT_RELAY_CONFIG_DIR` overrides the XDG location.
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("BOLT_RELAY_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("bolt-relay");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }
}
