//! Scripted `ImageGenerator` for runner and orchestrator tests.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::GenerationError;
use crate::gemini::client::{ImageGenerator, QualityTier};
use crate::image::ImageArtifact;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub seq: usize,
    pub at: Instant,
    pub prompt: String,
    pub credential: Option<String>,
    pub inputs: Vec<ImageArtifact>,
    pub tier: Option<QualityTier>,
}

/// Succeeds by default with an image whose bytes are `out-<seq>`; individual
/// calls (by zero-based sequence number) can be made to fail or to take time.
#[derive(Default)]
pub struct ScriptedGenerator {
    failures: HashMap<usize, GenerationError>,
    latencies: HashMap<usize, Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, seq: usize, error: GenerationError) -> Self {
        self.failures.insert(seq, error);
        self
    }

    pub fn latency_on(mut self, seq: usize, latency: Duration) -> Self {
        self.latencies.insert(seq, latency);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn output(seq: usize) -> ImageArtifact {
        ImageArtifact::new("image/png", format!("out-{}", seq).into_bytes())
    }

    async fn respond(
        &self,
        inputs: &[ImageArtifact],
        prompt: &str,
        credential: Option<&str>,
        tier: Option<QualityTier>,
    ) -> Result<ImageArtifact, GenerationError> {
        let seq = {
            let mut calls = self.calls.lock().expect("lock");
            let seq = calls.len();
            calls.push(RecordedCall {
                seq,
                at: Instant::now(),
                prompt: prompt.to_string(),
                credential: credential.map(str::to_string),
                inputs: inputs.to_vec(),
                tier,
            });
            seq
        };
        if let Some(latency) = self.latencies.get(&seq) {
            tokio::time::sleep(*latency).await;
        }
        match self.failures.get(&seq) {
            Some(error) => Err(error.clone()),
            None => Ok(Self::output(seq)),
        }
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: Option<&str>,
    ) -> Result<ImageArtifact, GenerationError> {
        self.respond(images, prompt, credential, None).await
    }

    async fn enhance_once(
        &self,
        image: &ImageArtifact,
        tier: QualityTier,
        credential: Option<&str>,
    ) -> Result<ImageArtifact, GenerationError> {
        self.respond(std::slice::from_ref(image), &tier.prompt(), credential, Some(tier))
            .await
    }

    async fn validate_key(&self, api_key: &str) -> Result<bool, GenerationError> {
        Ok(api_key.starts_with("valid"))
    }
}

pub fn quota_error() -> GenerationError {
    GenerationError::Upstream { status: 429, message: "Resource has been exhausted (e.g. check quota).".to_string() }
}

pub fn photo(tag: u8) -> ImageArtifact {
    ImageArtifact::new("image/jpeg", vec![tag])
}
