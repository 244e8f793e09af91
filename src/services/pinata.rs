//! IPFS pinning through Pinata.

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::PinataConfig;
use crate::error::PinningError;
use crate::services::MetadataPinner;

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

pub struct PinataClient {
    client: reqwest::Client,
    jwt: Option<SecretString>,
    api_url: String,
    gateway_url: String,
}

impl PinataClient {
    pub fn new(config: &PinataConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            jwt: config.jwt.clone(),
            api_url: config.api_url.clone(),
            gateway_url: config.gateway_url.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.jwt.is_some()
    }

    fn gateway_link(&self, hash: &str) -> String {
        format!("{}/ipfs/{}", self.gateway_url, hash)
    }

    fn jwt(&self) -> Result<&str, PinningError> {
        self.jwt
            .as_ref()
            .map(|jwt| jwt.expose_secret())
            .ok_or(PinningError::NotConfigured)
    }

    async fn read_hash(response: reqwest::Response, what: &str) -> Result<String, PinningError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PinningError::Failed {
                what: what.to_string(),
                reason: format!(
                    "HTTP {status}: {}",
                    body.chars().take(300).collect::<String>()
                ),
            });
        }
        let pinned: PinResponse = response.json().await?;
        Ok(pinned.ipfs_hash)
    }
}

#[async_trait]
impl MetadataPinner for PinataClient {
    async fn pin_file(&self, bytes: Bytes, filename: &str) -> Result<String, PinningError> {
        let jwt = self.jwt()?;
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/pinning/pinFileToIPFS", self.api_url))
            .bearer_auth(jwt)
            .multipart(form)
            .send()
            .await?;

        let hash = Self::read_hash(response, "file").await?;
        tracing::debug!(%hash, filename, "Pinned file");
        Ok(self.gateway_link(&hash))
    }

    async fn pin_json(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<String, PinningError> {
        let jwt = self.jwt()?;
        let body = serde_json::json!({
            "pinataContent": value,
            "pinataMetadata": { "name": name },
        });

        let response = self
            .client
            .post(format!("{}/pinning/pinJSONToIPFS", self.api_url))
            .bearer_auth(jwt)
            .json(&body)
            .send()
            .await?;

        let hash = Self::read_hash(response, "metadata").await?;
        tracing::debug!(%hash, name, "Pinned metadata");
        Ok(self.gateway_link(&hash))
    }
}
