//! Error types for mintbot.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Image generation error: {0}")]
    Image(#[from] ImageError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Pinning error: {0}")]
    Pinning(#[from] PinningError),
}

/// Failure domains used when reporting handler errors.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureDomain {
    Config,
    Channel,
    Collaborator,
    Timeout,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery surface errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to delete message {message_id} on channel {name}: {reason}")]
    DeleteFailed {
        name: String,
        message_id: String,
        reason: String,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Rate limited on channel {name}, retry after {retry_after:?}")]
    RateLimited {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Image generator errors.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Image provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Image provider {provider} returned no image data")]
    EmptyResult { provider: String },

    #[error("Image payload could not be decoded: {0}")]
    Decode(String),

    #[error("Prompt rejected: {0}")]
    InvalidPrompt(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Image store / backend-as-a-service errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload of {path} failed: {reason}")]
    UploadFailed { path: String, reason: String },

    #[error("Query on {table} failed: {reason}")]
    QueryFailed { table: String, reason: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Custodial wallet provider errors.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet provider is not configured")]
    NotConfigured,

    #[error("User {user_id} has no wallet")]
    NoWallet { user_id: String },

    #[error("Wallet provider request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Wallet record error: {0}")]
    Storage(#[from] StorageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Conversational agent errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Agent model request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid response from agent model: {reason}")]
    InvalidResponse { reason: String },

    #[error("Capability {capability} is not supported")]
    Unsupported { capability: String },

    #[error("Tool {name} failed: {reason}")]
    ToolFailed { name: String, reason: String },

    #[error("Agent wallet lookup failed: {0}")]
    Wallet(#[from] WalletError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// IPFS pinning errors.
#[derive(Debug, thiserror::Error)]
pub enum PinningError {
    #[error("Pinning service is not configured (PINATA_JWT not set)")]
    NotConfigured,

    #[error("Pinning {what} failed: {reason}")]
    Failed { what: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn is_transient_http(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.status().is_some_and(|s| s.is_server_error())
}

impl Error {
    /// Stable code used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config.invalid",
            Self::Channel(ChannelError::RateLimited { .. }) => "channel.rate_limited",
            Self::Channel(ChannelError::DeleteFailed { .. }) => "channel.delete_failed",
            Self::Channel(_) => "channel.failed",
            Self::Image(ImageError::EmptyResult { .. }) => "image.empty_result",
            Self::Image(_) => "image.failed",
            Self::Storage(StorageError::NotFound { .. }) => "storage.not_found",
            Self::Storage(_) => "storage.failed",
            Self::Wallet(WalletError::NoWallet { .. }) => "wallet.missing",
            Self::Wallet(WalletError::NotConfigured) => "wallet.not_configured",
            Self::Wallet(_) => "wallet.failed",
            Self::Agent(AgentError::Timeout { .. }) => "agent.timeout",
            Self::Agent(AgentError::Unsupported { .. }) => "agent.unsupported",
            Self::Agent(_) => "agent.failed",
            Self::Pinning(PinningError::NotConfigured) => "pinning.not_configured",
            Self::Pinning(_) => "pinning.failed",
        }
    }

    pub fn domain(&self) -> FailureDomain {
        match self {
            Self::Config(_) => FailureDomain::Config,
            Self::Channel(_) => FailureDomain::Channel,
            Self::Agent(AgentError::Timeout { .. }) => FailureDomain::Timeout,
            _ => FailureDomain::Collaborator,
        }
    }

    /// Whether retrying the same request later has a reasonable chance to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Channel(ChannelError::RateLimited { .. })
            | Self::Channel(ChannelError::Disconnected { .. })
            | Self::Channel(ChannelError::Http(_)) => true,
            Self::Channel(_) => false,
            Self::Image(ImageError::InvalidPrompt(_)) => false,
            Self::Image(ImageError::Http(e)) => is_transient_http(e),
            Self::Image(_) => true,
            Self::Storage(StorageError::Http(e)) => is_transient_http(e),
            Self::Storage(StorageError::NotFound { .. }) => false,
            Self::Storage(_) => true,
            Self::Wallet(WalletError::NotConfigured) | Self::Wallet(WalletError::NoWallet { .. }) => {
                false
            }
            Self::Wallet(_) => true,
            Self::Agent(AgentError::Unsupported { .. }) => false,
            Self::Agent(_) => true,
            Self::Pinning(PinningError::NotConfigured) => false,
            Self::Pinning(_) => true,
        }
    }
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
