//! Secrets configuration loaded from environment variables only.
//!
//! API keys never live in the TOML settings file. LocalAI values fall back
//! to their OpenAI counterparts so that an OpenAI-compatible endpoint can be
//! configured with either naming convention.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    /// Anthropic API key (env: ANTHROPIC_API_KEY)
    pub anthropic_api_key: Option<String>,

    /// OpenAI API key (env: OPENAI_API_KEY)
    pub openai_api_key: Option<String>,

    /// LocalAI API key (env: LOCALAI_API_KEY, falls back to OPENAI_API_KEY)
    pub localai_api_key: Option<String>,

    /// LocalAI base URL (env: LOCALAI_API_URL, falls back to OPENAI_BASE_URL)
    pub localai_api_url: Option<String>,

    /// LocalAI model (env: LOCALAI_MODEL, falls back to OPENAI_MODEL)
    pub localai_model: Option<String>,

    /// Slack bot token (env: SLACK_BOT_TOKEN)
    pub slack_bot_token: Option<String>,
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Environment variable {0} is not valid unicode")]
    NotUnicode(String),
}

/// Pairs of (primary, fallback) variable names.
const LOCALAI_FALLBACKS: [(&str, &str); 3] = [
    ("LOCALAI_API_KEY", "OPENAI_API_KEY"),
    ("LOCALAI_API_URL", "OPENAI_BASE_URL"),
    ("LOCALAI_MODEL", "OPENAI_MODEL"),
];

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// Loads a `.env` file first when present (development convenience).
    pub fn from_env() -> Result<Self, SecretsError> {
        super::load_dotenv();

        Self::from_env_inner()
    }

    /// Load from the process environment without touching `.env`.
    pub(crate) fn from_env_inner() -> Result<Self, SecretsError> {
        let mut invalid = None;
        let secrets = Self::from_lookup(|name| match env::var(name) {
            Ok(value) => Some(value),
            Err(env::VarError::NotPresent) => None,
            Err(env::VarError::NotUnicode(_)) => {
                invalid.get_or_insert_with(|| name.to_string());
                None
            }
        });

        match invalid {
            Some(name) => Err(SecretsError::NotUnicode(name)),
            None => Ok(secrets),
        }
    }

    /// Build secrets from an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut localai = LOCALAI_FALLBACKS.map(|(primary, fallback)| {
            get(primary).or_else(|| {
                let value = get(fallback);
                if value.is_some() {
                    tracing::info!("Using {} for {}", fallback, primary);
                }
                value
            })
        });

        Self {
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            localai_api_key: localai[0].take(),
            localai_api_url: localai[1].take(),
            localai_model: localai[2].take(),
            slack_bot_token: get("SLACK_BOT_TOKEN"),
        }
    }

    /// Names of the completion providers that have a key configured.
    pub fn available_providers(&self) -> Vec<&'static str> {
        let mut providers = Vec::new();
        if self.anthropic_api_key.is_some() {
            providers.push("anthropic");
        }
        if self.openai_api_key.is_some() {
            providers.push("openai");
        }
        if self.localai_api_key.is_some() || self.localai_api_url.is_some() {
            providers.push("localai");
        }
        providers
    }
}

/// Mask a secret for logging: keeps the first and last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
