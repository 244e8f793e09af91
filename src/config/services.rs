use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_optional_env, required_env, validate_url};
use crate::error::ConfigError;
use crate::settings::Settings;

/// OpenAI credentials and model selection, shared by the image generator
/// and the conversational agent.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub image_model: String,
    pub chat_model: String,
    pub temperature: f32,
    pub max_tool_steps: usize,
}

/// Supabase project used for image storage and wallet rows.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: SecretString,
    pub images_bucket: String,
}

/// Privy server-wallet credentials.
#[derive(Debug, Clone)]
pub struct PrivyConfig {
    pub app_id: String,
    pub app_secret: SecretString,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct PinataConfig {
    /// Unset disables the "create collection" flow.
    pub jwt: Option<SecretString>,
    pub api_url: String,
    pub gateway_url: String,
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    /// Signing bridge for collection creation, minting and transfers.
    pub toolkit_url: Option<String>,
}

impl OpenAiConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let api_key = required_env(
            "OPENAI_API_KEY",
            "Set it to an OpenAI API key with image and chat access",
        )?;

        let base_url = validate_url(
            "OPENAI_BASE_URL",
            optional_env("OPENAI_BASE_URL")?
                .or_else(|| settings.openai.base_url.clone())
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        )?;

        let temperature = parse_optional_env::<f32>("OPENAI_TEMPERATURE", "a number")?
            .or(settings.openai.temperature)
            .unwrap_or(0.7);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                key: "OPENAI_TEMPERATURE".to_string(),
                message: format!("must be between 0.0 and 2.0, got {temperature}"),
            });
        }

        let max_tool_steps =
            parse_optional_env::<usize>("AGENT_MAX_TOOL_STEPS", "a positive integer")?
                .or(settings.openai.max_tool_steps)
                .unwrap_or(5);
        if max_tool_steps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_MAX_TOOL_STEPS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
            image_model: optional_env("OPENAI_IMAGE_MODEL")?
                .or_else(|| settings.openai.image_model.clone())
                .unwrap_or_else(|| "gpt-image-1".to_string()),
            chat_model: optional_env("OPENAI_CHAT_MODEL")?
                .or_else(|| settings.openai.chat_model.clone())
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature,
            max_tool_steps,
        })
    }
}

impl SupabaseConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let url = validate_url(
            "SUPABASE_URL",
            required_env("SUPABASE_URL", "Use the project URL from the Supabase dashboard")?,
        )?;
        let service_key = required_env(
            "SUPABASE_SERVICE_KEY",
            "Use the service_role key; the anon key cannot write to storage",
        )?;

        Ok(Self {
            url,
            service_key: SecretString::from(service_key),
            images_bucket: optional_env("SUPABASE_IMAGES_BUCKET")?
                .unwrap_or_else(|| "images".to_string()),
        })
    }
}

impl PrivyConfig {
    /// Returns `None` (with a warning) when either credential is missing.
    pub(crate) fn resolve() -> Result<Option<Self>, ConfigError> {
        let app_id = optional_env("PRIVY_APP_ID")?;
        let app_secret = optional_env("PRIVY_APP_SECRET")?;

        let (Some(app_id), Some(app_secret)) = (app_id, app_secret) else {
            tracing::warn!(
                "PRIVY_APP_ID or PRIVY_APP_SECRET not set; wallet features are disabled"
            );
            return Ok(None);
        };

        Ok(Some(Self {
            app_id,
            app_secret: SecretString::from(app_secret),
            api_url: validate_url(
                "PRIVY_API_URL",
                optional_env("PRIVY_API_URL")?
                    .unwrap_or_else(|| "https://api.privy.io".to_string()),
            )?,
        }))
    }
}

impl PinataConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let jwt = optional_env("PINATA_JWT")?.map(SecretString::from);
        if jwt.is_none() {
            tracing::warn!("PINATA_JWT not set; NFT collection creation is disabled");
        }

        Ok(Self {
            jwt,
            api_url: validate_url(
                "PINATA_API_URL",
                optional_env("PINATA_API_URL")?
                    .or_else(|| settings.pinata.api_url.clone())
                    .unwrap_or_else(|| "https://api.pinata.cloud".to_string()),
            )?,
            gateway_url: validate_url(
                "PINATA_GATEWAY",
                optional_env("PINATA_GATEWAY")?
                    .or_else(|| settings.pinata.gateway_url.clone())
                    .unwrap_or_else(|| "https://gateway.pinata.cloud".to_string()),
            )?,
        })
    }
}

impl SolanaConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let rpc_url = validate_url(
            "RPC_URL",
            optional_env("RPC_URL")?
                .or_else(|| settings.solana.rpc_url.clone())
                .unwrap_or_else(|| "https://api.mainnet-beta.solana.com".to_string()),
        )?;

        let toolkit_url = optional_env("SOLANA_TOOLKIT_URL")?
            .or_else(|| settings.solana.toolkit_url.clone())
            .map(|url| validate_url("SOLANA_TOOLKIT_URL", url))
            .transpose()?;

        Ok(Self {
            rpc_url,
            toolkit_url,
        })
    }
}
