//! Configuration for the bot.
//!
//! A single TOML file at `~/.courier/config.toml`, deserialized with
//! per-field defaults so a minimal file only needs the secrets.
//!
//! # Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (`TELEGRAM_BOT_TOKEN`, `OPENAI_API_KEY`)
//! 3. Default values
//!
//! Missing secrets after merging are a fatal startup condition, not a
//! runtime error.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::catalog::{default_models, ModelCatalog, ModelSpec};
use crate::session::ChatOptions;

/// Errors that prevent startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required secret: {0}")]
    MissingSecret(String),

    #[error("Model catalog is empty")]
    EmptyCatalog,

    #[error("Default model '{0}' is not in the model catalog")]
    UnknownDefaultModel(String),
}

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".courier"),
        |dirs| dirs.home_dir().join(".courier"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token from @BotFather.
    #[serde(default)]
    pub bot_token: String,

    /// Telegram @usernames or numeric user IDs allowed to talk to the
    /// bot; `"*"` admits everyone.
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_users: default_allowed_users(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,

    /// Override for Azure or compatible endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Fixed output-token budget per completion.
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: i64,

    /// Whole-call budget before a request degrades to an error reply.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_max_completion_tokens() -> i64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            max_completion_tokens: default_max_completion_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Catalog key used when a user hasn't picked a model.
    #[serde(default = "default_model_key")]
    pub default_model: String,

    /// System prompt used when a user hasn't installed one.
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
}

fn default_model_key() -> String {
    "gpt-4.1-nano".into()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Keep your answers informative and useful.".into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: default_model_key(),
            default_system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// USD → local currency conversion rate for cost display.
    #[serde(default = "default_usd_rate")]
    pub usd_rate: f64,

    /// Symbol shown next to local amounts.
    #[serde(default = "default_currency_symbol")]
    pub symbol: String,
}

fn default_usd_rate() -> f64 {
    107.0
}

fn default_currency_symbol() -> String {
    "₽".into()
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            usd_rate: default_usd_rate(),
            symbol: default_currency_symbol(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// trace | debug | info | warn | error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" for humans, "json" for log shippers.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub currency: CurrencyConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// The model catalog; overriding replaces the whole table.
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
}

impl Config {
    /// Load from an explicit path, or the default location. A missing
    /// default file yields defaults plus environment secrets; a missing
    /// explicit path is an error.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::load_unvalidated(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read the file without checking secrets — enough for read-only
    /// presentation such as the `models` subcommand.
    pub fn load_unvalidated(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let expanded = shellexpand::tilde(p).into_owned();
                Self::from_toml(&std::fs::read_to_string(expanded)?)
            }
            None => {
                let default_path = config_path();
                if default_path.exists() {
                    Self::from_toml(&std::fs::read_to_string(default_path)?)
                } else {
                    Ok(Self::with_defaults())
                }
            }
        }
    }

    /// Parse a TOML document; absent sections fall back to defaults.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// The configuration a completely empty file would produce.
    pub fn with_defaults() -> Self {
        Self {
            models: default_models(),
            ..Self::default()
        }
    }

    /// Fill empty secrets from the conventional environment variables.
    pub fn apply_env_overrides(&mut self) {
        if self.telegram.bot_token.is_empty() {
            if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
                self.telegram.bot_token = token;
            }
        }
        if self.openai.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.openai.api_key = key;
            }
        }
    }

    /// Check the invariants a running process relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.is_empty() {
            return Err(ConfigError::MissingSecret(
                "telegram.bot_token (or TELEGRAM_BOT_TOKEN)".into(),
            ));
        }
        if self.openai.api_key.is_empty() {
            return Err(ConfigError::MissingSecret(
                "openai.api_key (or OPENAI_API_KEY)".into(),
            ));
        }
        if self.models.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        if !self.models.iter().any(|m| m.key == self.chat.default_model) {
            return Err(ConfigError::UnknownDefaultModel(
                self.chat.default_model.clone(),
            ));
        }
        Ok(())
    }

    /// The immutable catalog this config describes.
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::new(self.models.clone())
    }

    /// Manager knobs derived from this config.
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            default_model: self.chat.default_model.clone(),
            default_system_prompt: self.chat.default_system_prompt.clone(),
            max_completion_tokens: self.openai.max_completion_tokens,
            request_timeout: Duration::from_secs(self.openai.request_timeout_secs),
            usd_rate: self.currency.usd_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn configured() -> Config {
        let mut config = Config::with_defaults();
        config.telegram.bot_token = "123:ABC".into();
        config.openai.api_key = "sk-test".into();
        config
    }

    #[test]
    fn defaults_match_the_shipped_catalog() {
        let config = Config::with_defaults();
        assert_eq!(config.models.len(), 6);
        assert_eq!(config.chat.default_model, "gpt-4.1-nano");
        assert_eq!(config.openai.max_completion_tokens, 5000);
        assert!((config.currency.usd_rate - 107.0).abs() < f64::EPSILON);
        assert_eq!(config.telegram.allowed_users, vec!["*".to_string()]);
    }

    #[test]
    fn minimal_toml_only_needs_secrets() {
        let raw = r#"
            [telegram]
            bot_token = "123:ABC"

            [openai]
            api_key = "sk-test"
        "#;
        let config = Config::from_toml(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.openai.base_url, "https://api.openai.com");
        assert_eq!(config.models.len(), 6);
    }

    #[test]
    fn missing_bot_token_is_fatal() {
        let mut config = Config::with_defaults();
        config.openai.api_key = "sk-test".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSecret(_))
        ));
    }

    #[test]
    fn unknown_default_model_is_fatal() {
        let mut config = configured();
        config.chat.default_model = "gpt-nonexistent".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownDefaultModel(_))
        ));
    }

    #[test]
    fn empty_catalog_is_fatal() {
        let mut config = configured();
        config.models.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCatalog)));
    }

    #[test]
    fn custom_model_table_replaces_the_catalog() {
        let raw = r#"
            [telegram]
            bot_token = "123:ABC"

            [openai]
            api_key = "sk-test"

            [chat]
            default_model = "my-model"

            [[models]]
            key = "my-model"
            display_name = "My Model"
            input_price = 1.0
            output_price = 3.0
        "#;
        let config = Config::from_toml(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.catalog().get("my-model").unwrap().output_price, 3.0);
    }

    #[test]
    fn load_reads_an_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[telegram]\nbot_token = \"123:ABC\"\n\n[openai]\napi_key = \"sk-file\""
        )
        .unwrap();

        let config = Config::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.openai.api_key, "sk-file");
    }

    #[test]
    fn chat_options_carry_the_timeout() {
        let config = configured();
        let opts = config.chat_options();
        assert_eq!(opts.request_timeout, Duration::from_secs(120));
        assert_eq!(opts.default_model, "gpt-4.1-nano");
    }
}
