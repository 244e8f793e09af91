//! External collaborators.
//!
//! The bot never does real work itself: image synthesis, storage, wallet
//! custody, agent reasoning and IPFS pinning all sit behind the traits in
//! this module. Production implementations live in the submodules.

mod agent;
mod images;
mod pinata;
mod privy;
mod solana;
mod supabase;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, ImageError, PinningError, StorageError, WalletError};

pub use self::agent::{OpenAiToolAgent, SOLANA_SYSTEM_PROMPT, ToolSpec, Toolkit};
pub use self::images::{HttpImageFetcher, OpenAiImageGenerator};
pub use self::pinata::PinataClient;
pub use self::privy::PrivyWalletService;
pub use self::solana::{SolanaToolkit, is_valid_address, lamports_to_sol};
pub use self::supabase::{SupabaseClient, SupabaseImageStore, SupabaseUserStore};

/// One generated image as stored by the image store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub user_id: String,
    pub prompt: String,
    pub filename: String,
    pub path: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// A user's custodial wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub user_id: String,
    pub address: String,
    pub wallet_id: String,
    pub is_delegated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Exported key material. Debug output is redacted by `SecretString`.
#[derive(Debug, Clone)]
pub struct WalletExport {
    pub address: String,
    pub private_key: SecretString,
}

/// Something the conversational agent can do on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    WalletAddress,
    SolBalance,
    CreateCollection,
    MintNft,
    Transfer,
    DeployToken,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WalletAddress => "wallet_address",
            Self::SolBalance => "sol_balance",
            Self::CreateCollection => "create_collection",
            Self::MintNft => "mint_nft",
            Self::Transfer => "transfer",
            Self::DeployToken => "deploy_token",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities the agent advertises up front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Render `prompt` to PNG bytes.
    async fn generate(&self, prompt: &str, transparent: bool) -> Result<Vec<u8>, ImageError>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(
        &self,
        bytes: &[u8],
        filename: &str,
        user_id: &str,
        prompt: &str,
    ) -> Result<ImageRecord, StorageError>;

    /// All of a user's images, newest first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ImageRecord>, StorageError>;
}

#[async_trait]
pub trait WalletService: Send + Sync {
    async fn create_wallet(&self, user_id: &str) -> Result<WalletRecord, WalletError>;

    async fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, WalletError>;

    async fn get_or_create_wallet(&self, user_id: &str) -> Result<WalletRecord, WalletError>;

    /// `None` when the user has no wallet.
    async fn export_private_key(&self, user_id: &str)
    -> Result<Option<WalletExport>, WalletError>;

    async fn is_delegated(&self, user_id: &str) -> Result<bool, WalletError> {
        Ok(self
            .get_wallet(user_id)
            .await?
            .is_some_and(|wallet| wallet.is_delegated))
    }

    /// Returns whether the flag was updated.
    async fn set_delegation(&self, user_id: &str, delegated: bool) -> Result<bool, WalletError>;
}

#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    fn capabilities(&self) -> CapabilitySet;

    /// Answer one natural-language message on behalf of `user_id`.
    async fn respond(&self, user_id: &str, message: &str) -> Result<String, AgentError>;
}

#[async_trait]
pub trait MetadataPinner: Send + Sync {
    /// Pin raw bytes, returning a gateway URL.
    async fn pin_file(&self, bytes: Bytes, filename: &str) -> Result<String, PinningError>;

    /// Pin a JSON document, returning a gateway URL.
    async fn pin_json(&self, name: &str, value: &serde_json::Value)
    -> Result<String, PinningError>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_membership() {
        let caps: CapabilitySet = [Capability::WalletAddress, Capability::SolBalance]
            .into_iter()
            .collect();

        assert!(caps.supports(Capability::SolBalance));
        assert!(!caps.supports(Capability::MintNft));

        let caps = caps.with(Capability::MintNft);
        assert_eq!(
            caps.iter().map(Capability::as_str).collect::<Vec<_>>(),
            vec!["wallet_address", "sol_balance", "mint_nft"]
        );
    }

    #[test]
    fn wallet_export_debug_is_redacted() {
        let export = WalletExport {
            address: "addr".to_string(),
            private_key: SecretString::from("super-secret-key"),
        };
        assert!(!format!("{export:?}").contains("super-secret-key"));
    }
}
