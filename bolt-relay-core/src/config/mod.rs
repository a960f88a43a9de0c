//! Configuration management for bolt-relay.
//!
//! Secrets come from environment variables, settings from a TOML file.
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `ANTHROPIC_API_KEY` - Anthropic API key
//! - `OPENAI_API_KEY` - OpenAI API key
//! - `LOCALAI_API_KEY`, `LOCALAI_API_URL`, `LOCALAI_MODEL` - OpenAI-compatible
//!   endpoint, each falling back to `OPENAI_API_KEY`, `OPENAI_BASE_URL` and
//!   `OPENAI_MODEL`
//! - `SLACK_BOT_TOKEN` - chat surface token
//!
//! ## Settings (TOML File)
//! Located at `~/.config/bolt-relay/config.toml`:
//! ```toml
//! [preparation]
//! max_attempts = 12
//! backoff_base_ms = 5000
//! backoff_max_ms = 30000
//! status_command = "indexer status {resource}"
//!
//! [stream]
//! update_interval_ms = 500
//!
//! [logging]
//! level = "info"
//! ```

mod secrets;
mod settings;

pub use secrets::{Secrets, SecretsError, mask_secret};
pub use settings::{LoggingSettings, PreparationSettings, Settings, SettingsError, StreamSettings};

/// Load .env file if it exists.
pub fn load_dotenv() {
    // Silently ignore errors (file might not exist)
    let _ = dotenvy::dotenv();
}

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("preparation.max_attempts must be at least 1")]
    NoAttempts,

    #[error("stream.poll_interval_ms must be greater than zero")]
    ZeroPollInterval,

    #[error("preparation.call_timeout_ms must be greater than zero")]
    ZeroCallTimeout,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file cannot be read or parsed, or if
    /// the loaded values cannot drive the preparation and stream loops.
    pub fn load() -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env()?;
        let settings = Settings::load()?;
        Self::from_parts(secrets, settings)
    }

    /// Validate already-loaded parts.
    pub fn from_parts(secrets: Secrets, settings: Settings) -> Result<Self, ConfigError> {
        if settings.preparation.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if settings.stream.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if settings.preparation.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroCallTimeout);
        }
        Ok(Self { secrets, settings })
    }

    /// Log which providers are configured, with keys masked.
    pub fn log_summary(&self) {
        let providers = self.secrets.available_providers();
        if providers.is_empty() {
            tracing::warn!("No completion provider API key found in environment variables");
        } else {
            tracing::info!("Configured completion providers: {}", providers.join(", "));
        }

        if let Some(url) = &self.secrets.localai_api_url {
            tracing::info!("LocalAI API URL: {}", url);
        }
        if let Some(model) = &self.secrets.localai_model {
            tracing::info!("LocalAI model: {}", model);
        }
        if let Some(key) = &self.secrets.localai_api_key {
            tracing::info!("LocalAI API key: {}", mask_secret(key));
        }
    }
}
