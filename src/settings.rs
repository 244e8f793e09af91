//! File-backed settings overlay.
//!
//! Everything here is optional. Values read from `~/.mintbot/config.toml`
//! (or the `--config` path) sit between env vars and built-in defaults.
//! Secrets are never read from this file; they come from the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Non-secret settings loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Conversation behaviour (timeouts, output directory).
    #[serde(default)]
    pub bot: BotSettings,

    /// Delivery surfaces.
    #[serde(default)]
    pub channels: ChannelSettings,

    /// Model selection for the image generator and the agent.
    #[serde(default)]
    pub openai: OpenAiSettings,

    /// Solana RPC and signing bridge.
    #[serde(default)]
    pub solana: SolanaSettings,

    /// IPFS pinning service.
    #[serde(default)]
    pub pinata: PinataSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BotSettings {
    /// Upper bound on a single agent call, in seconds.
    #[serde(default)]
    pub agent_timeout_secs: Option<u64>,

    /// Interval between "typing" signals while the agent works, in seconds.
    #[serde(default)]
    pub typing_interval_secs: Option<u64>,

    /// Where local copies of generated images are written.
    #[serde(default)]
    pub generated_images_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelSettings {
    /// Telegram owner user ID. When set, the bot only responds to this user.
    #[serde(default)]
    pub telegram_owner_id: Option<i64>,

    /// Port of the health listener.
    #[serde(default)]
    pub health_port: Option<u16>,

    /// Long-poll timeout passed to `getUpdates`, in seconds.
    #[serde(default)]
    pub telegram_poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OpenAiSettings {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub image_model: Option<String>,

    #[serde(default)]
    pub chat_model: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tool_steps: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SolanaSettings {
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Signing bridge that performs collection creation, minting and transfers.
    #[serde(default)]
    pub toolkit_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PinataSettings {
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub gateway_url: Option<String>,
}

impl Settings {
    /// Default TOML config file path (~/.mintbot/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::mintbot_home().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &std::path::Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }
}

#[cfg(test)]
mod tests {
    use crate::settings::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn default_toml_path_under_mintbot() {
        let path = Settings::default_toml_path();
        assert!(path.to_string_lossy().contains(".mintbot"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_toml_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let loaded = Settings::load_toml(&dir.path().join("nope.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_toml_partial_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[bot]
agent_timeout_secs = 45

[openai]
chat_model = "gpt-4o"

[solana]
toolkit_url = "http://127.0.0.1:8899"
"#,
        )
        .unwrap();

        let settings = Settings::load_toml(&path).unwrap().unwrap();
        assert_eq!(settings.bot.agent_timeout_secs, Some(45));
        assert_eq!(settings.bot.typing_interval_secs, None);
        assert_eq!(settings.openai.chat_model.as_deref(), Some("gpt-4o"));
        assert_eq!(
            settings.solana.toolkit_url.as_deref(),
            Some("http://127.0.0.1:8899")
        );
        assert_eq!(settings.pinata, PinataSettings::default());
    }

    #[test]
    fn load_toml_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bot\nagent_timeout_secs = ").unwrap();

        let err = Settings::load_toml(&path).unwrap_err();
        assert!(err.contains("invalid TOML"));
    }
}
