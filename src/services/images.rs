use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::error::{ImageError, StorageError};
use crate::services::{ImageFetcher, ImageGenerator};

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// `POST /v1/images/generations` with base64 output.
pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiImageGenerator {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.image_model.clone(),
        }
    }
}

fn decode_first_image(response: GenerationResponse) -> Result<Vec<u8>, ImageError> {
    let encoded = response
        .data
        .into_iter()
        .find_map(|image| image.b64_json)
        .ok_or_else(|| ImageError::EmptyResult {
            provider: PROVIDER.to_string(),
        })?;
    BASE64
        .decode(encoded.trim())
        .map_err(|e| ImageError::Decode(e.to_string()))
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str, transparent: bool) -> Result<Vec<u8>, ImageError> {
        if prompt.trim().is_empty() {
            return Err(ImageError::InvalidPrompt("prompt is empty".to_string()));
        }

        let request = GenerationRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: "1024x1024",
            background: transparent.then_some("transparent"),
        };

        tracing::debug!(model = %self.model, transparent, "Requesting image generation");
        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            if status == reqwest::StatusCode::BAD_REQUEST {
                return Err(ImageError::InvalidPrompt(reason));
            }
            return Err(ImageError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason,
            });
        }

        let parsed: GenerationResponse = response.json().await?;
        decode_first_image(parsed)
    }
}

/// Downloads previously stored images by public URL.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::NotFound {
                entity: "image".to_string(),
                id: url.to_string(),
            });
        }
        Ok(response.bytes().await?)
    }
}
