//! HTTP client for the generation proxy.
//!
//! - `generate` posts images + prompt and returns one image.
//! - `enhance_once` runs a single quality-enhancement pass on one image.
//! - `validate_key` checks a credential without side effects.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::GenerationError;
use crate::gemini::payload::{
    build_generate_payload, build_validation_payload, count_tokens_endpoint, extract_error_message,
    extract_image, generate_endpoint, proxy_envelope,
};
use crate::image::ImageArtifact;

/// Output quality requested from an enhancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "hd", alias = "HD")]
    Hd,
    #[serde(rename = "2k", alias = "2K")]
    TwoK,
    #[serde(rename = "4k", alias = "4K")]
    FourK,
}

impl QualityTier {
    /// Number of enhancement passes this tier takes. 4K is two 4K passes.
    pub fn passes(self) -> usize {
        match self {
            QualityTier::FourK => 2,
            _ => 1,
        }
    }

    pub fn image_size(self) -> &'static str {
        match self {
            QualityTier::Hd => "1K",
            QualityTier::TwoK => "2K",
            QualityTier::FourK => "4K",
        }
    }

    pub fn prompt(self) -> String {
        let target = match self {
            QualityTier::Hd => "HD",
            QualityTier::TwoK => "2K",
            QualityTier::FourK => "4K",
        };
        format!(
            "Enhance this image to {} quality. Sharpen fine detail and texture, remove noise and \
             compression artifacts. Keep the composition, subject, colors and style exactly the same.",
            target
        )
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hd" => Ok(QualityTier::Hd),
            "2k" => Ok(QualityTier::TwoK),
            "4k" => Ok(QualityTier::FourK),
            other => Err(format!("unknown quality tier '{}', expected hd, 2k or 4k", other)),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityTier::Hd => "hd",
            QualityTier::TwoK => "2k",
            QualityTier::FourK => "4k",
        };
        f.write_str(s)
    }
}

/// One logical call against the image service. Implementations never swallow
/// failures; every error is returned to the caller.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: Option<&str>,
    ) -> Result<ImageArtifact, GenerationError>;

    async fn enhance_once(
        &self,
        image: &ImageArtifact,
        tier: QualityTier,
        credential: Option<&str>,
    ) -> Result<ImageArtifact, GenerationError>;

    async fn validate_key(&self, api_key: &str) -> Result<bool, GenerationError>;
}

/// A user credential counts only when it is non-empty after trimming.
pub fn user_credential(credential: Option<&str>) -> Option<&str> {
    credential.map(str::trim).filter(|k| !k.is_empty())
}

#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
    proxy_url: String,
    model: String,
    shared_key_available: bool,
}

impl ProxyClient {
    pub fn new(proxy_url: String, model: String, shared_key_available: bool, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        });
        ProxyClient { client, proxy_url, model, shared_key_available }
    }

    pub fn from_config(config: &Config) -> Self {
        ProxyClient::new(
            config.proxy_url.clone(),
            config.model.clone(),
            config.shared_key_available,
            config.request_timeout(),
        )
    }

    /// Pick the credential for a call: the user's key when present, otherwise
    /// the proxy's shared key (`Ok(None)`), otherwise `NoCredential`.
    fn resolve_credential<'a>(&self, credential: Option<&'a str>) -> Result<Option<&'a str>, GenerationError> {
        match user_credential(credential) {
            Some(key) => Ok(Some(key)),
            None if self.shared_key_available => Ok(None),
            None => Err(GenerationError::NoCredential),
        }
    }

    async fn post_proxy(&self, endpoint: &str, payload: Value, user_key: Option<&str>) -> Result<Value, GenerationError> {
        tracing::debug!(endpoint, personal_key = user_key.is_some(), "Sending request to proxy at {}", self.proxy_url);
        let body = proxy_envelope(endpoint, payload, user_key);
        let response = self
            .client
            .post(&self.proxy_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = extract_error_message(status.as_u16(), &text);
            tracing::warn!(status = status.as_u16(), "Proxy request failed: {}", message);
            return Err(GenerationError::Upstream { status: status.as_u16(), message });
        }
        serde_json::from_str(&text).map_err(|e| GenerationError::InvalidResponse(e.to_string()))
    }

    async fn generate_with_size(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        image_size: Option<&str>,
        credential: Option<&str>,
    ) -> Result<ImageArtifact, GenerationError> {
        if images.is_empty() {
            return Err(GenerationError::InvalidInput("at least one input image is required".to_string()));
        }
        if prompt.trim().is_empty() {
            return Err(GenerationError::InvalidInput("prompt must not be empty".to_string()));
        }
        let user_key = self.resolve_credential(credential)?;
        let payload = build_generate_payload(images, prompt, image_size);
        let response = self.post_proxy(&generate_endpoint(&self.model), payload, user_key).await?;
        let image = extract_image(&response)?;
        tracing::info!(mime = %image.mime_type, bytes = image.data.len(), "Received generated image");
        Ok(image)
    }
}

#[async_trait]
impl ImageGenerator for ProxyClient {
    async fn generate(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: Option<&str>,
    ) -> Result<ImageArtifact, GenerationError> {
        self.generate_with_size(images, prompt, None, credential).await
    }

    async fn enhance_once(
        &self,
        image: &ImageArtifact,
        tier: QualityTier,
        credential: Option<&str>,
    ) -> Result<ImageArtifact, GenerationError> {
        let images = std::slice::from_ref(image);
        self.generate_with_size(images, &tier.prompt(), Some(tier.image_size()), credential)
            .await
    }

    async fn validate_key(&self, api_key: &str) -> Result<bool, GenerationError> {
        let Some(key) = user_credential(Some(api_key)) else {
            return Ok(false);
        };
        let endpoint = count_tokens_endpoint(&self.model);
        match self.post_proxy(&endpoint, build_validation_payload(), Some(key)).await {
            Ok(_) => Ok(true),
            Err(GenerationError::Upstream { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }
}
