//! Top-level run orchestration.
//!
//! Owns the generator and the shared rate governor and hands them to runners.
//! New submissions are refused while a quota cooldown is counting down.
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::gemini::classifier::classify;
use crate::gemini::client::{user_credential, ImageGenerator, QualityTier};
use crate::image::ImageArtifact;
use crate::rate::{RateGovernor, RateStatus};
use crate::runner::enhance::enhance;
use crate::runner::variation::MAX_VARIATIONS;
use crate::runner::{BatchOutcome, BatchRunner, EventSink, Pacing, RunEvent, VariationOutcome, VariationRunner};
use crate::task::TaskDescriptor;

/// A run executing on its own task; `events` streams its progress.
pub struct RunHandle<T> {
    pub events: UnboundedReceiver<RunEvent>,
    pub join: JoinHandle<T>,
}

#[derive(Clone)]
pub struct Orchestrator {
    generator: Arc<dyn ImageGenerator>,
    governor: Arc<RateGovernor>,
    pacing: Pacing,
    default_workers: usize,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        governor: Arc<RateGovernor>,
        pacing: Pacing,
        default_workers: usize,
    ) -> Self {
        Orchestrator { generator, governor, pacing, default_workers: default_workers.max(1) }
    }

    pub fn from_config(config: &Config, generator: Arc<dyn ImageGenerator>, governor: Arc<RateGovernor>) -> Self {
        Orchestrator::new(generator, governor, Pacing::new(config.dispatch_delay()), config.variation_workers)
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn rate_status(&self) -> RateStatus {
        self.governor.status()
    }

    fn ensure_admitted(&self) -> AppResult<()> {
        let seconds = self.governor.cooldown_remaining();
        if seconds > 0 {
            tracing::warn!(seconds, "Rejecting submission during cooldown");
            return Err(AppError::CoolingDown { seconds });
        }
        if self.governor.remaining() == 0 {
            tracing::warn!("Local request budget is used up; upstream may reject calls");
        }
        Ok(())
    }

    /// One generation, dispatched immediately.
    pub async fn generate_single(
        &self,
        images: &[ImageArtifact],
        prompt: &str,
        credential: Option<&str>,
    ) -> AppResult<ImageArtifact> {
        self.ensure_admitted()?;
        validate_request(images, prompt)?;
        let credential = user_credential(credential);
        self.governor.record_request();
        self.generator
            .generate(images, prompt, credential)
            .await
            .map_err(|err| {
                let classified = classify(&err, credential.is_some());
                if classified.kind == ErrorKind::QuotaExhausted {
                    self.governor.trigger_cooldown();
                }
                AppError::Generation(classified)
            })
    }

    pub fn spawn_batch(&self, tasks: Vec<TaskDescriptor>, credential: Option<String>) -> AppResult<RunHandle<BatchOutcome>> {
        self.ensure_admitted()?;
        for task in &tasks {
            validate_request(&task.images, &task.prompt)?;
        }
        let runner = BatchRunner::new(self.generator.clone(), self.governor.clone(), self.pacing, credential);
        let (sink, events) = EventSink::channel();
        let join = tokio::spawn(async move { runner.run(tasks, &sink).await });
        Ok(RunHandle { events, join })
    }

    pub fn spawn_variations(
        &self,
        images: Vec<ImageArtifact>,
        prompt: String,
        count: usize,
        workers: Option<usize>,
        credential: Option<String>,
    ) -> AppResult<RunHandle<VariationOutcome>> {
        self.ensure_admitted()?;
        validate_request(&images, &prompt)?;
        if count == 0 {
            return Err(AppError::InvalidRequest("variation count must be at least 1".to_string()));
        }
        if u32::try_from(count).is_err() || count > MAX_VARIATIONS {
            return Err(AppError::InvalidRequest(format!(
                "variation count must be at most {}",
                MAX_VARIATIONS
            )));
        }
        if workers == Some(0) {
            return Err(AppError::InvalidRequest("workers must be at least 1".to_string()));
        }
        let runner = VariationRunner::new(
            self.generator.clone(),
            self.governor.clone(),
            self.pacing,
            credential,
            workers.unwrap_or(self.default_workers),
        );
        let (sink, events) = EventSink::channel();
        let join = tokio::spawn(async move { runner.run(&images, &prompt, count, &sink).await });
        Ok(RunHandle { events, join })
    }

    pub async fn enhance(
        &self,
        image: &ImageArtifact,
        tier: QualityTier,
        credential: Option<&str>,
    ) -> AppResult<ImageArtifact> {
        self.ensure_admitted()?;
        enhance(&self.generator, &self.governor, self.pacing, image, tier, credential)
            .await
            .map_err(AppError::Generation)
    }

    pub async fn validate_key(&self, api_key: &str) -> AppResult<bool> {
        self.generator
            .validate_key(api_key)
            .await
            .map_err(|err| AppError::Generation(classify(&err, true)))
    }
}

fn validate_request(images: &[ImageArtifact], prompt: &str) -> AppResult<()> {
    if images.is_empty() {
        return Err(AppError::InvalidRequest("at least one image is required".to_string()));
    }
    if prompt.trim().is_empty() {
        return Err(AppError::InvalidRequest("prompt must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunSnapshot;
    use crate::testing::{photo, quota_error, ScriptedGenerator};

    fn orchestrator(generator: ScriptedGenerator) -> (Orchestrator, Arc<ScriptedGenerator>) {
        let scripted = Arc::new(generator);
        let orchestrator = Orchestrator::new(scripted.clone(), Arc::new(RateGovernor::new()), Pacing::default(), 1);
        (orchestrator, scripted)
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_rejects_new_runs() {
        let (orchestrator, scripted) = orchestrator(ScriptedGenerator::new().fail_on(0, quota_error()));

        let err = orchestrator.generate_single(&[photo(1)], "cartoon", None).await.unwrap_err();
        assert!(matches!(err, AppError::Generation(ref e) if e.kind == ErrorKind::QuotaExhausted));
        assert_eq!(orchestrator.rate_status().cooldown_seconds, 60);

        let batch = orchestrator.spawn_batch(vec![TaskDescriptor::new(1, vec![photo(1)], "cartoon")], None);
        assert!(matches!(batch, Err(AppError::CoolingDown { seconds: 60 })));
        let variations = orchestrator.spawn_variations(vec![photo(1)], "cartoon".into(), 2, None, None);
        assert!(matches!(variations, Err(AppError::CoolingDown { .. })));
        assert_eq!(scripted.calls().len(), 1);

        for _ in 0..60 {
            orchestrator.governor().tick();
        }
        assert!(orchestrator.spawn_batch(Vec::new(), None).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_batch_streams_events() {
        let (orchestrator, _) = orchestrator(ScriptedGenerator::new());
        let tasks = (1..=2).map(|id| TaskDescriptor::new(id, vec![photo(id as u8)], "ukiyo-e")).collect();
        let mut handle = orchestrator.spawn_batch(tasks, Some("key".to_string())).expect("admitted");

        let mut snapshot = RunSnapshot::default();
        while let Some(event) = handle.events.recv().await {
            snapshot.apply(&event);
        }
        let outcome = handle.join.await.expect("join");
        assert!(snapshot.finished);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.results.len(), outcome.results.len());
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_up_front() {
        let (orchestrator, scripted) = orchestrator(ScriptedGenerator::new());
        assert!(matches!(
            orchestrator.generate_single(&[], "x", None).await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            orchestrator.spawn_variations(vec![photo(1)], "x".into(), 0, None, None),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            orchestrator.spawn_variations(vec![photo(1)], "x".into(), MAX_VARIATIONS + 1, None, None),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            orchestrator.spawn_variations(vec![photo(1)], "x".into(), u32::MAX as usize + 3, None, None),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            orchestrator.spawn_variations(vec![photo(1)], "x".into(), 2, Some(0), None),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(scripted.calls().is_empty());
        assert!(orchestrator.validate_key("valid-123").await.expect("validated"));
    }
}
