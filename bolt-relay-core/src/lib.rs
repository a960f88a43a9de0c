pub mod config;

pub use config::{
    Config, ConfigError, LoggingSettings, PreparationSettings, Secrets, SecretsError, Settings,
    SettingsError, StreamSettings, load_dotenv, mask_secret,
};
