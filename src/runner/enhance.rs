//! Quality enhancement. Every pass is a paced, recorded dispatch; 4K is two
//! passes at the same tier, the second fed with the first's output.
use std::sync::Arc;

use crate::error::{ClassifiedError, ErrorKind};
use crate::gemini::classifier::classify;
use crate::gemini::client::{user_credential, ImageGenerator, QualityTier};
use crate::image::ImageArtifact;
use crate::rate::RateGovernor;
use crate::runner::pacing::Pacing;

pub async fn enhance(
    generator: &Arc<dyn ImageGenerator>,
    governor: &RateGovernor,
    pacing: Pacing,
    image: &ImageArtifact,
    tier: QualityTier,
    credential: Option<&str>,
) -> Result<ImageArtifact, ClassifiedError> {
    let credential = user_credential(credential);
    let mut current = image.clone();
    for pass in 1..=tier.passes() {
        pacing.wait().await;
        governor.record_request();
        tracing::info!(%tier, pass, passes = tier.passes(), "Dispatching enhancement");
        current = generator
            .enhance_once(&current, tier, credential)
            .await
            .map_err(|err| {
                let classified = classify(&err, credential.is_some());
                if classified.kind == ErrorKind::QuotaExhausted {
                    governor.trigger_cooldown();
                }
                tracing::warn!(%tier, pass, kind = ?classified.kind, "Enhancement failed: {}", err);
                classified
            })?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{photo, quota_error, ScriptedGenerator};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn four_k_is_two_paced_passes() {
        let scripted = Arc::new(ScriptedGenerator::new());
        let generator: Arc<dyn ImageGenerator> = scripted.clone();
        let governor = RateGovernor::new();
        let started = tokio::time::Instant::now();

        let output = enhance(&generator, &governor, Pacing::default(), &photo(5), QualityTier::FourK, None)
            .await
            .expect("enhanced");

        let calls = scripted.calls();
        assert_eq!(calls.iter().map(|c| c.seq).collect::<Vec<_>>(), [0, 1]);
        assert_eq!(calls[0].at - started, Duration::from_millis(1100));
        assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1100));
        assert!(calls.iter().all(|c| c.tier == Some(QualityTier::FourK)));
        assert_eq!(calls[0].inputs, vec![photo(5)]);
        assert_eq!(calls[1].inputs, vec![ScriptedGenerator::output(0)]);
        assert_eq!(output, ScriptedGenerator::output(1));
        assert_eq!(governor.used(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lower_tiers_are_one_pass() {
        let scripted = Arc::new(ScriptedGenerator::new());
        let generator: Arc<dyn ImageGenerator> = scripted.clone();
        let governor = RateGovernor::new();
        enhance(&generator, &governor, Pacing::default(), &photo(1), QualityTier::TwoK, Some("k"))
            .await
            .expect("enhanced");
        assert_eq!(scripted.calls().len(), 1);
        assert_eq!(scripted.calls()[0].credential.as_deref(), Some("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_pass_stops_four_k() {
        let scripted = Arc::new(ScriptedGenerator::new().fail_on(0, quota_error()));
        let generator: Arc<dyn ImageGenerator> = scripted.clone();
        let governor = RateGovernor::new();
        let err = enhance(&generator, &governor, Pacing::default(), &photo(1), QualityTier::FourK, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuotaExhausted);
        assert_eq!(scripted.calls().len(), 1);
        assert!(governor.is_cooling_down());
    }
}
