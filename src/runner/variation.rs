//! N variations of one request over a bounded worker pool.
//!
//! Workers are futures polled together on the calling task. Each pulls the next
//! queued item, waits the dispatch delay, records the request and writes the
//! result under the item's original position, so completion order never matters.
//! Quota exhaustion starts the shared cooldown but does not stop the other items.
use futures::future::join_all;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ErrorKind;
use crate::gemini::classifier::classify;
use crate::gemini::client::{user_credential, ImageGenerator};
use crate::image::ImageArtifact;
use crate::rate::RateGovernor;
use crate::runner::events::{EventSink, RunEvent};
use crate::runner::pacing::Pacing;
use crate::task::TaskResult;

pub const DEFAULT_WORKERS: usize = 1;
/// Upper bound on items in one variation run.
pub const MAX_VARIATIONS: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariationOutcome {
    pub total: usize,
    pub completed: usize,
    /// Indexed by item position.
    pub results: Vec<TaskResult>,
}

struct Shared {
    queue: VecDeque<(u32, String)>,
    results: Vec<TaskResult>,
    completed: usize,
}

pub struct VariationRunner {
    generator: Arc<dyn ImageGenerator>,
    governor: Arc<RateGovernor>,
    pacing: Pacing,
    credential: Option<String>,
    workers: usize,
}

impl VariationRunner {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        governor: Arc<RateGovernor>,
        pacing: Pacing,
        credential: Option<String>,
        workers: usize,
    ) -> Self {
        VariationRunner { generator, governor, pacing, credential, workers: workers.max(1) }
    }

    fn pool_size(&self, count: usize) -> usize {
        self.workers.min(count)
    }

    /// Runs at most `MAX_VARIATIONS` items; a larger `count` is cut down and the
    /// reported total follows the cut.
    pub async fn run(&self, images: &[ImageArtifact], prompt: &str, count: usize, events: &EventSink) -> VariationOutcome {
        if count > MAX_VARIATIONS {
            tracing::warn!(requested = count, max = MAX_VARIATIONS, "Too many variations requested, capping");
        }
        let count = count.min(MAX_VARIATIONS);
        let pool = self.pool_size(count);
        // The same prompt text, repeated.
        let queue = (0..count as u32).map(|i| (i, prompt.to_string())).collect();
        let results = (0..count as u32).map(TaskResult::pending).collect::<Vec<_>>();

        tracing::info!(count, workers = pool, "Starting variation run");
        events.emit(RunEvent::Started { total: count });
        for result in &results {
            events.emit(RunEvent::TaskUpdated { result: result.clone() });
        }

        let shared = Mutex::new(Shared { queue, results, completed: 0 });
        let workers = (0..pool).map(|worker| self.worker(worker, images, count, &shared, events));
        join_all(workers).await;

        let shared = shared.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::info!(count, completed = shared.completed, "Variation run completed");
        events.emit(RunEvent::Finished { completed: shared.completed, total: count });
        VariationOutcome { total: count, completed: shared.completed, results: shared.results }
    }

    async fn worker(
        &self,
        worker: usize,
        images: &[ImageArtifact],
        total: usize,
        shared: &Mutex<Shared>,
        events: &EventSink,
    ) {
        let has_user_credential = user_credential(self.credential.as_deref()).is_some();
        loop {
            let next = lock(shared).queue.pop_front();
            let Some((index, prompt)) = next else {
                break;
            };
            let slot = index as usize;

            self.pacing.wait().await;
            self.governor.record_request();
            {
                let mut state = lock(shared);
                state.results[slot].start();
                events.emit(RunEvent::TaskUpdated { result: state.results[slot].clone() });
            }
            tracing::debug!(worker, item = index, "Dispatching variation");

            let outcome = self
                .generator
                .generate(images, &prompt, user_credential(self.credential.as_deref()))
                .await;

            let mut state = lock(shared);
            match outcome {
                Ok(image) => state.results[slot].succeed(image),
                Err(err) => {
                    let classified = classify(&err, has_user_credential);
                    tracing::warn!(worker, item = index, kind = ?classified.kind, "Variation failed: {}", err);
                    if classified.kind == ErrorKind::QuotaExhausted {
                        self.governor.trigger_cooldown();
                    }
                    state.results[slot].fail(classified);
                }
            }
            state.completed += 1;
            events.emit(RunEvent::TaskUpdated { result: state.results[slot].clone() });
            events.emit(RunEvent::Progress { completed: state.completed, total });
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
