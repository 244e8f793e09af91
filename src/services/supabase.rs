//! Supabase storage and PostgREST access.
//!
//! Images go to a storage bucket at `{user_id}/{filename}` with a row in the
//! `images` table; wallet bookkeeping lives in the `users` table keyed by
//! `telegram_id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::SupabaseConfig;
use crate::error::StorageError;
use crate::services::{ImageRecord, ImageStore, WalletRecord};

const IMAGES_TABLE: &str = "images";
const USERS_TABLE: &str = "users";

/// Shared HTTP plumbing for one Supabase project.
#[derive(Clone)]
pub struct SupabaseClient {
    client: reqwest::Client,
    url: String,
    service_key: SecretString,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            service_key: config.service_key.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let key = self.service_key.expose_secret();
        self.client
            .request(method, url)
            .header("apikey", key)
            .bearer_auth(key)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.url, bucket, path)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.url, bucket, path)
    }
}

async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(300).collect();
    format!("HTTP {status}: {body}")
}

/// PostgREST ids may be integers or uuids; keep them as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(deserialize_with = "string_or_number")]
    user_id: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    url: String,
    created_at: DateTime<Utc>,
}

impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            prompt: row.prompt,
            filename: row.filename,
            path: row.path,
            url: row.url,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewImage<'a> {
    user_id: &'a str,
    prompt: &'a str,
    filename: &'a str,
    path: &'a str,
    url: &'a str,
}

/// Image store backed by Supabase storage plus the `images` table.
pub struct SupabaseImageStore {
    supabase: SupabaseClient,
    bucket: String,
}

impl SupabaseImageStore {
    pub fn new(supabase: SupabaseClient, bucket: impl Into<String>) -> Self {
        Self {
            supabase,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ImageStore for SupabaseImageStore {
    async fn store(
        &self,
        bytes: &[u8],
        filename: &str,
        user_id: &str,
        prompt: &str,
    ) -> Result<ImageRecord, StorageError> {
        let path = format!("{user_id}/{filename}");

        let upload = self
            .supabase
            .request(
                reqwest::Method::POST,
                self.supabase.object_url(&self.bucket, &path),
            )
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes.to_vec())
            .send()
            .await?;
        if !upload.status().is_success() {
            return Err(StorageError::UploadFailed {
                path,
                reason: error_body(upload).await,
            });
        }

        let url = self.supabase.public_url(&self.bucket, &path);
        let row = NewImage {
            user_id,
            prompt,
            filename,
            path: &path,
            url: &url,
        };

        let response = self
            .supabase
            .request(reqwest::Method::POST, self.supabase.rest_url(IMAGES_TABLE))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StorageError::QueryFailed {
                table: IMAGES_TABLE.to_string(),
                reason: error_body(response).await,
            });
        }

        let mut rows: Vec<ImageRow> = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let record: ImageRecord = rows
            .pop()
            .ok_or_else(|| StorageError::QueryFailed {
                table: IMAGES_TABLE.to_string(),
                reason: "insert returned no rows".to_string(),
            })?
            .into();

        tracing::debug!(image_id = %record.id, %path, "Stored image");
        Ok(record)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ImageRecord>, StorageError> {
        let response = self
            .supabase
            .request(reqwest::Method::GET, self.supabase.rest_url(IMAGES_TABLE))
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{user_id}")),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StorageError::QueryFailed {
                table: IMAGES_TABLE.to_string(),
                reason: error_body(response).await,
            });
        }

        let rows: Vec<ImageRow> = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(rows.into_iter().map(ImageRecord::from).collect())
    }
}

#[derive(Debug, Deserialize)]
struct UserRow {
    #[serde(deserialize_with = "string_or_number")]
    telegram_id: String,
    #[serde(default)]
    wallet_address: Option<String>,
    #[serde(default)]
    wallet_id: Option<String>,
    #[serde(default)]
    is_wallet_delegated: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    /// A row only describes a wallet once both provider fields are set.
    fn into_wallet(self) -> Option<WalletRecord> {
        Some(WalletRecord {
            user_id: self.telegram_id,
            address: self.wallet_address?,
            wallet_id: self.wallet_id?,
            is_delegated: self.is_wallet_delegated.unwrap_or(false),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Wallet bookkeeping rows in the `users` table.
pub struct SupabaseUserStore {
    supabase: SupabaseClient,
}

impl SupabaseUserStore {
    pub fn new(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }

    async fn read_rows(
        &self,
        response: reqwest::Response,
    ) -> Result<Vec<UserRow>, StorageError> {
        if !response.status().is_success() {
            return Err(StorageError::QueryFailed {
                table: USERS_TABLE.to_string(),
                reason: error_body(response).await,
            });
        }
        response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Wallet stored for a Telegram user, if any.
    pub async fn get_wallet(&self, telegram_id: &str) -> Result<Option<WalletRecord>, StorageError> {
        let response = self
            .supabase
            .request(reqwest::Method::GET, self.supabase.rest_url(USERS_TABLE))
            .query(&[
                ("select", "*".to_string()),
                ("telegram_id", format!("eq.{telegram_id}")),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let rows = self.read_rows(response).await?;
        Ok(rows.into_iter().next().and_then(UserRow::into_wallet))
    }

    /// Insert or replace the wallet for a Telegram user.
    pub async fn save_wallet(
        &self,
        telegram_id: &str,
        address: &str,
        wallet_id: &str,
    ) -> Result<WalletRecord, StorageError> {
        let now = Utc::now();
        let body = serde_json::json!({
            "telegram_id": telegram_id,
            "wallet_address": address,
            "wallet_id": wallet_id,
            "is_wallet_delegated": false,
            "updated_at": now,
        });

        let response = self
            .supabase
            .request(reqwest::Method::POST, self.supabase.rest_url(USERS_TABLE))
            .query(&[("on_conflict", "telegram_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body)
            .send()
            .await?;

        let rows = self.read_rows(response).await?;
        rows.into_iter()
            .next()
            .and_then(UserRow::into_wallet)
            .ok_or_else(|| StorageError::QueryFailed {
                table: USERS_TABLE.to_string(),
                reason: "upsert returned no wallet row".to_string(),
            })
    }

    /// Returns `false` when no row exists for the user.
    pub async fn set_delegation(
        &self,
        telegram_id: &str,
        delegated: bool,
    ) -> Result<bool, StorageError> {
        let body = serde_json::json!({
            "is_wallet_delegated": delegated,
            "updated_at": Utc::now(),
        });

        let response = self
            .supabase
            .request(reqwest::Method::PATCH, self.supabase.rest_url(USERS_TABLE))
            .query(&[("telegram_id", format!("eq.{telegram_id}"))])
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;

        let rows = self.read_rows(response).await?;
        Ok(!rows.is_empty())
    }
}
