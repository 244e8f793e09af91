//! Configuration for mintbot.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! Secrets live in env vars or `~/.mintbot/.env` (loaded via dotenvy early
//! in startup). Non-secret tuning can also come from `~/.mintbot/config.toml`.

mod channels;
pub(crate) mod helpers;
mod services;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::settings::Settings;

pub use self::channels::{ChannelsConfig, HealthConfig, TelegramConfig};
pub use self::services::{OpenAiConfig, PinataConfig, PrivyConfig, SolanaConfig, SupabaseConfig};

/// Main configuration for the bot.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot: BotConfig,
    pub channels: ChannelsConfig,
    pub openai: OpenAiConfig,
    pub supabase: SupabaseConfig,
    pub privy: Option<PrivyConfig>,
    pub pinata: PinataConfig,
    pub solana: SolanaConfig,
}

/// Conversation handling knobs.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub agent_timeout: Duration,
    pub typing_interval: Duration,
    pub generated_images_dir: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(30),
            typing_interval: Duration::from_secs(5),
            generated_images_dir: PathBuf::from("generated_images"),
        }
    }
}

impl BotConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let agent_timeout_secs = helpers::parse_optional_env::<u64>(
            "AGENT_TIMEOUT_SECS",
            "a positive integer",
        )?
        .or(settings.bot.agent_timeout_secs)
        .unwrap_or(defaults.agent_timeout.as_secs());

        let typing_interval_secs = helpers::parse_optional_env::<u64>(
            "TYPING_INTERVAL_SECS",
            "a positive integer",
        )?
        .or(settings.bot.typing_interval_secs)
        .unwrap_or(defaults.typing_interval.as_secs());

        Ok(Self {
            agent_timeout: Duration::from_secs(helpers::ensure_positive(
                "AGENT_TIMEOUT_SECS",
                agent_timeout_secs,
            )?),
            typing_interval: Duration::from_secs(helpers::ensure_positive(
                "TYPING_INTERVAL_SECS",
                typing_interval_secs,
            )?),
            generated_images_dir: helpers::optional_env("GENERATED_IMAGES_DIR")?
                .map(PathBuf::from)
                .or_else(|| settings.bot.generated_images_dir.clone())
                .unwrap_or(defaults.generated_images_dir),
        })
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads both `./.env` (standard, higher priority) and `~/.mintbot/.env`
    /// (lower priority) via dotenvy, which never overwrites existing vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_mintbot_env();

        let settings = Self::load_toml_overlay(toml_path)?;
        Self::build(&settings)
    }

    /// Load the TOML config file.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries the default path `~/.mintbot/config.toml` (missing
    /// file is silently ignored).
    fn load_toml_overlay(explicit_path: Option<&std::path::Path>) -> Result<Settings, ConfigError> {
        let path = explicit_path
            .map(std::path::PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(settings)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                Ok(settings)
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Ok(Settings::default())
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
                Ok(Settings::default())
            }
        }
    }

    /// Build config from settings.
    pub(crate) fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            bot: BotConfig::resolve(settings)?,
            channels: ChannelsConfig::resolve(settings)?,
            openai: OpenAiConfig::resolve(settings)?,
            supabase: SupabaseConfig::resolve()?,
            privy: PrivyConfig::resolve()?,
            pinata: PinataConfig::resolve(settings)?,
            solana: SolanaConfig::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::settings::Settings;
    use secrecy::ExposeSecret;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_KEYS: &[&str] = &[
        "TELEGRAM_BOT_TOKEN",
        "TELEGRAM_API_URL",
        "TELEGRAM_OWNER_ID",
        "TELEGRAM_POLL_TIMEOUT_SECS",
        "HEALTH_HOST",
        "PORT",
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "OPENAI_IMAGE_MODEL",
        "OPENAI_CHAT_MODEL",
        "OPENAI_TEMPERATURE",
        "AGENT_MAX_TOOL_STEPS",
        "SUPABASE_URL",
        "SUPABASE_SERVICE_KEY",
        "SUPABASE_IMAGES_BUCKET",
        "PRIVY_APP_ID",
        "PRIVY_APP_SECRET",
        "PRIVY_API_URL",
        "PINATA_JWT",
        "PINATA_API_URL",
        "PINATA_GATEWAY",
        "RPC_URL",
        "SOLANA_TOOLKIT_URL",
        "AGENT_TIMEOUT_SECS",
        "TYPING_INTERVAL_SECS",
        "GENERATED_IMAGES_DIR",
    ];

    fn clear_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            for key in ALL_KEYS {
                std::env::remove_var(key);
            }
        }
    }

    fn set_required_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-test");
            std::env::set_var("SUPABASE_URL", "https://abc.supabase.co/");
            std::env::set_var("SUPABASE_SERVICE_KEY", "service-key");
        }
    }

    #[test]
    fn build_uses_defaults_with_required_vars() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();
        set_required_env();

        let config = Config::build(&Settings::default()).expect("config builds");

        assert_eq!(config.bot.agent_timeout, Duration::from_secs(30));
        assert_eq!(config.bot.typing_interval, Duration::from_secs(5));
        assert_eq!(config.channels.health.port, 3007);
        assert!(config.channels.telegram.is_none());
        assert_eq!(config.openai.image_model, "gpt-image-1");
        assert_eq!(config.openai.chat_model, "gpt-4o-mini");
        assert_eq!(config.openai.max_tool_steps, 5);
        assert_eq!(config.supabase.url, "https://abc.supabase.co");
        assert_eq!(config.supabase.images_bucket, "images");
        assert!(config.privy.is_none());
        assert!(config.pinata.jwt.is_none());
        assert_eq!(config.solana.rpc_url, "https://api.mainnet-beta.solana.com");
        assert!(config.solana.toolkit_url.is_none());

        clear_env();
    }

    #[test]
    fn build_reports_missing_required_key() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-test");
        }

        let err = Config::build(&Settings::default()).unwrap_err();
        match err {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "SUPABASE_URL"),
            other => panic!("unexpected error: {other}"),
        }

        clear_env();
    }

    #[test]
    fn env_overrides_toml_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();
        set_required_env();
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
            std::env::set_var("AGENT_TIMEOUT_SECS", "12");
            std::env::set_var("PRIVY_APP_ID", "app");
            std::env::set_var("PRIVY_APP_SECRET", "secret");
        }

        let mut settings = Settings::default();
        settings.bot.agent_timeout_secs = Some(90);
        settings.bot.typing_interval_secs = Some(2);
        settings.channels.telegram_owner_id = Some(777);

        let config = Config::build(&settings).expect("config builds");
        assert_eq!(config.bot.agent_timeout, Duration::from_secs(12));
        assert_eq!(config.bot.typing_interval, Duration::from_secs(2));

        let telegram = config.channels.telegram.expect("telegram configured");
        assert_eq!(telegram.bot_token.expose_secret(), "123:abc");
        assert_eq!(telegram.owner_id, Some(777));
        assert_eq!(telegram.api_base_url, "https://api.telegram.org");

        let privy = config.privy.expect("privy configured");
        assert_eq!(privy.app_id, "app");

        clear_env();
    }

    #[test]
    fn build_rejects_invalid_values() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();
        set_required_env();

        for (key, value) in [
            ("PORT", "not-a-port"),
            ("AGENT_TIMEOUT_SECS", "0"),
            ("RPC_URL", "ftp://example.com"),
        ] {
            // SAFETY: Guarded by ENV_MUTEX in tests.
            unsafe {
                std::env::set_var(key, value);
            }

            let err = Config::build(&Settings::default()).unwrap_err();
            match err {
                ConfigError::InvalidValue { key: got, .. } => assert_eq!(got, key),
                other => panic!("unexpected error for {key}: {other}"),
            }

            // SAFETY: Guarded by ENV_MUTEX in tests.
            unsafe {
                std::env::remove_var(key);
            }
        }

        clear_env();
    }

    #[test]
    fn explicit_missing_toml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_toml_overlay(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
