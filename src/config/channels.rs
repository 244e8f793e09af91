use secrecy::SecretString;

use crate::config::helpers::{ensure_positive, optional_env, parse_optional_env, validate_url};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Channel configurations.
#[derive(Debug, Clone)]
pub struct ChannelsConfig {
    /// Present when `TELEGRAM_BOT_TOKEN` is set. Required by `mintbot run`.
    pub telegram: Option<TelegramConfig>,
    pub health: HealthConfig,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
    /// Telegram owner user ID. When set, the bot only responds to this user.
    pub owner_id: Option<i64>,
    pub poll_timeout_secs: u64,
}

/// Plain-text liveness listener used by hosting platforms.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub host: String,
    pub port: u16,
}

impl ChannelsConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let telegram = match optional_env("TELEGRAM_BOT_TOKEN")? {
            Some(token) => Some(TelegramConfig {
                bot_token: SecretString::from(token),
                api_base_url: validate_url(
                    "TELEGRAM_API_URL",
                    optional_env("TELEGRAM_API_URL")?
                        .unwrap_or_else(|| "https://api.telegram.org".to_string()),
                )?,
                owner_id: parse_optional_env::<i64>("TELEGRAM_OWNER_ID", "an integer")?
                    .or(settings.channels.telegram_owner_id),
                poll_timeout_secs: ensure_positive(
                    "TELEGRAM_POLL_TIMEOUT_SECS",
                    parse_optional_env("TELEGRAM_POLL_TIMEOUT_SECS", "a positive integer")?
                        .or(settings.channels.telegram_poll_timeout_secs)
                        .unwrap_or(30),
                )?,
            }),
            None => None,
        };

        let health = HealthConfig {
            host: optional_env("HEALTH_HOST")?.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_optional_env::<u16>("PORT", "a valid port number")?
                .or(settings.channels.health_port)
                .unwrap_or(3007),
        };

        Ok(Self { telegram, health })
    }
}

impl TelegramConfig {
    /// Error for `run` mode when no bot token is configured.
    pub fn missing() -> ConfigError {
        ConfigError::MissingRequired {
            key: "TELEGRAM_BOT_TOKEN".to_string(),
            hint: "Create a bot with @BotFather and export its token, or use `mintbot repl`"
                .to_string(),
        }
    }
}
