//! Custodial Solana wallets through Privy server wallets.
//!
//! Privy holds the keys; the `users` table only remembers which wallet
//! belongs to which Telegram user and whether server signing is enabled.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::PrivyConfig;
use crate::error::WalletError;
use crate::services::supabase::SupabaseUserStore;
use crate::services::{WalletExport, WalletRecord, WalletService};

#[derive(Debug, Deserialize)]
struct PrivyWallet {
    id: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct PrivyExport {
    private_key: String,
}

/// Stored wallets stay readable without Privy credentials; anything that
/// talks to the provider fails with [`WalletError::NotConfigured`].
pub struct PrivyWalletService {
    client: reqwest::Client,
    config: Option<PrivyConfig>,
    users: SupabaseUserStore,
}

impl PrivyWalletService {
    pub fn new(config: Option<PrivyConfig>, users: SupabaseUserStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            users,
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, WalletError> {
        let config = self.config.as_ref().ok_or(WalletError::NotConfigured)?;
        Ok(self
            .client
            .request(method, format!("{}/v1/{}", config.api_url, path))
            .basic_auth(&config.app_id, Some(config.app_secret.expose_secret()))
            .header("privy-app-id", &config.app_id))
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, WalletError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WalletError::RequestFailed {
                reason: format!(
                    "{what}: HTTP {status}: {}",
                    body.chars().take(300).collect::<String>()
                ),
            });
        }
        response.json().await.map_err(|e| WalletError::RequestFailed {
            reason: format!("{what}: unreadable response: {e}"),
        })
    }

    async fn provider_create(&self) -> Result<PrivyWallet, WalletError> {
        let response = self
            .request(reqwest::Method::POST, "wallets")?
            .json(&serde_json::json!({ "chain_type": "solana" }))
            .send()
            .await?;
        Self::read(response, "create wallet").await
    }

    async fn provider_get(&self, wallet_id: &str) -> Result<PrivyWallet, WalletError> {
        let response = self
            .request(reqwest::Method::GET, &format!("wallets/{wallet_id}"))?
            .send()
            .await?;
        Self::read(response, "get wallet").await
    }
}

#[async_trait]
impl WalletService for PrivyWalletService {
    async fn create_wallet(&self, user_id: &str) -> Result<WalletRecord, WalletError> {
        let wallet = self.provider_create().await?;
        let record = self
            .users
            .save_wallet(user_id, &wallet.address, &wallet.id)
            .await?;
        tracing::info!(user_id, address = %record.address, "Created wallet");
        Ok(record)
    }

    async fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, WalletError> {
        Ok(self.users.get_wallet(user_id).await?)
    }

    async fn get_or_create_wallet(&self, user_id: &str) -> Result<WalletRecord, WalletError> {
        let Some(stored) = self.users.get_wallet(user_id).await? else {
            return self.create_wallet(user_id).await;
        };

        match self.provider_get(&stored.wallet_id).await {
            Ok(_) => Ok(stored),
            Err(WalletError::NotConfigured) => Err(WalletError::NotConfigured),
            Err(e) => {
                tracing::warn!(
                    user_id,
                    wallet_id = %stored.wallet_id,
                    "Stored wallet not found at provider, creating a new one: {}",
                    e
                );
                self.create_wallet(user_id).await
            }
        }
    }

    async fn export_private_key(
        &self,
        user_id: &str,
    ) -> Result<Option<WalletExport>, WalletError> {
        let Some(stored) = self.users.get_wallet(user_id).await? else {
            return Ok(None);
        };

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("wallets/{}/export", stored.wallet_id),
            )?
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let export: PrivyExport = Self::read(response, "export wallet").await?;

        Ok(Some(WalletExport {
            address: stored.address,
            private_key: SecretString::from(export.private_key),
        }))
    }

    async fn set_delegation(&self, user_id: &str, delegated: bool) -> Result<bool, WalletError> {
        let updated = self.users.set_delegation(user_id, delegated).await?;
        if updated {
            tracing::info!(user_id, delegated, "Updated wallet delegation");
        }
        Ok(updated)
    }
}
