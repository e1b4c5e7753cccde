//! Sequential batch execution.
//!
//! Tasks run one at a time in input order, spaced by the dispatch delay (the
//! first dispatch goes out immediately). Failures are isolated per task, except
//! that quota exhaustion on the shared key aborts the whole run and discards
//! every result: every remaining task would fail the same way.
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ClassifiedError, ErrorKind};
use crate::gemini::classifier::classify;
use crate::gemini::client::{user_credential, ImageGenerator};
use crate::rate::RateGovernor;
use crate::runner::events::{EventSink, RunEvent};
use crate::runner::pacing::Pacing;
use crate::task::{TaskDescriptor, TaskResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub completed: usize,
    /// Ordered like the input. Empty when the run was aborted.
    pub results: Vec<TaskResult>,
    pub error: Option<ClassifiedError>,
}

impl BatchOutcome {
    pub fn is_aborted(&self) -> bool {
        self.error.is_some()
    }
}

pub struct BatchRunner {
    generator: Arc<dyn ImageGenerator>,
    governor: Arc<RateGovernor>,
    pacing: Pacing,
    credential: Option<String>,
}

impl BatchRunner {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        governor: Arc<RateGovernor>,
        pacing: Pacing,
        credential: Option<String>,
    ) -> Self {
        BatchRunner { generator, governor, pacing, credential }
    }

    fn credential(&self) -> Option<&str> {
        user_credential(self.credential.as_deref())
    }

    pub async fn run(&self, tasks: Vec<TaskDescriptor>, events: &EventSink) -> BatchOutcome {
        let total = tasks.len();
        let has_user_credential = self.credential().is_some();
        let mut results: Vec<TaskResult> = tasks.iter().map(|t| TaskResult::pending(t.id)).collect();
        let mut completed = 0;

        tracing::info!(total, personal_key = has_user_credential, "Starting batch run");
        events.emit(RunEvent::Started { total });
        for result in &results {
            events.emit(RunEvent::TaskUpdated { result: result.clone() });
        }

        for (index, task) in tasks.iter().enumerate() {
            if index > 0 {
                self.pacing.wait().await;
            }
            results[index].start();
            events.emit(RunEvent::TaskUpdated { result: results[index].clone() });
            self.governor.record_request();
            tracing::debug!(task_id = task.id, images = task.images.len(), "Dispatching batch task");

            match self.generator.generate(&task.images, &task.prompt, self.credential()).await {
                Ok(image) => results[index].succeed(image),
                Err(err) => {
                    let classified = classify(&err, has_user_credential);
                    tracing::warn!(task_id = task.id, kind = ?classified.kind, "Batch task failed: {}", err);
                    if classified.kind == ErrorKind::QuotaExhausted {
                        self.governor.trigger_cooldown();
                        if !has_user_credential {
                            tracing::error!(task_id = task.id, "Shared key out of quota, aborting batch");
                            events.emit(RunEvent::Aborted {
                                kind: classified.kind,
                                message: classified.message.clone(),
                            });
                            return BatchOutcome { total, completed, results: Vec::new(), error: Some(classified) };
                        }
                    }
                    results[index].fail(classified);
                }
            }

            events.emit(RunEvent::TaskUpdated { result: results[index].clone() });
            completed += 1;
            events.emit(RunEvent::Progress { completed, total });
        }

        tracing::info!(total, "Batch run completed");
        events.emit(RunEvent::Finished { completed, total });
        BatchOutcome { total, completed, results, error: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::task::TaskStatus;
    use crate::testing::{photo, quota_error, ScriptedGenerator};
    use std::time::Duration;

    fn tasks(n: u32) -> Vec<TaskDescriptor> {
        (1..=n).map(|id| TaskDescriptor::new(id, vec![photo(id as u8)], format!("style {}", id))).collect()
    }

    fn runner(generator: &Arc<ScriptedGenerator>, governor: &Arc<RateGovernor>, credential: Option<&str>) -> BatchRunner {
        BatchRunner::new(
            generator.clone(),
            governor.clone(),
            Pacing::default(),
            credential.map(str::to_string),
        )
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_in_order_with_spacing() {
        let generator = Arc::new(ScriptedGenerator::new().latency_on(0, Duration::from_secs(3)));
        let governor = Arc::new(RateGovernor::new());
        let started = tokio::time::Instant::now();

        let outcome = runner(&generator, &governor, None).run(tasks(3), &EventSink::discard()).await;

        let calls = generator.calls();
        let prompts: Vec<_> = calls.iter().map(|c| c.prompt.as_str()).collect();
        assert_eq!(prompts, ["style 1", "style 2", "style 3"]);
        assert_eq!(calls[0].at, started, "first dispatch is not delayed");
        // Task 2 only starts after task 1's 3s call finished, plus the spacing.
        assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(4100));
        assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(1100));

        assert_eq!(outcome.completed, 3);
        let ids: Vec<_> = outcome.results.iter().map(|r| r.task_id).collect();
        assert_eq!(ids, [1, 2, 3]);
        assert_eq!(outcome.results[1].output, Some(ScriptedGenerator::output(1)));
        assert_eq!(governor.used(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated_per_task() {
        let generator = Arc::new(
            ScriptedGenerator::new().fail_on(1, GenerationError::SafetyBlocked("SAFETY".to_string())),
        );
        let governor = Arc::new(RateGovernor::new());
        let outcome = runner(&generator, &governor, None).run(tasks(3), &EventSink::discard()).await;

        let statuses: Vec<_> = outcome.results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, [TaskStatus::Success, TaskStatus::Failed, TaskStatus::Success]);
        assert_eq!(outcome.results[1].error_kind, Some(ErrorKind::SafetyBlocked));
        assert!(outcome.results[1].error_message.is_some());
        assert!(!outcome.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_key_quota_aborts_and_discards() {
        let generator = Arc::new(ScriptedGenerator::new().fail_on(0, quota_error()));
        let governor = Arc::new(RateGovernor::new());
        let (sink, mut rx) = EventSink::channel();

        let outcome = runner(&generator, &governor, Some("   ")).run(tasks(3), &sink).await;

        assert_eq!(generator.calls().len(), 1, "tasks 2 and 3 are never dispatched");
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.error.as_ref().map(|e| e.kind), Some(ErrorKind::QuotaExhausted));
        assert_eq!(governor.cooldown_remaining(), 60);

        let events = drain(&mut rx);
        let aborts = events.iter().filter(|e| matches!(e, RunEvent::Aborted { .. })).count();
        assert_eq!(aborts, 1);
        assert!(!events.iter().any(|e| matches!(e, RunEvent::Finished { .. })));
        let snapshot = crate::runner::events::RunSnapshot::fold(&events);
        assert!(snapshot.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn personal_key_quota_keeps_going() {
        let generator = Arc::new(ScriptedGenerator::new().fail_on(0, quota_error()));
        let governor = Arc::new(RateGovernor::new());
        let outcome = runner(&generator, &governor, Some("my-key")).run(tasks(3), &EventSink::discard()).await;

        assert_eq!(generator.calls().len(), 3);
        assert_eq!(generator.calls()[0].credential.as_deref(), Some("my-key"));
        assert_eq!(outcome.results[0].error_kind, Some(ErrorKind::QuotaExhausted));
        assert_eq!(outcome.results[2].status, TaskStatus::Success);
        assert!(!outcome.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_finishes_once() {
        let generator = Arc::new(ScriptedGenerator::new().fail_on(2, GenerationError::Network("timed out".into())));
        let governor = Arc::new(RateGovernor::new());
        let (sink, mut rx) = EventSink::channel();
        runner(&generator, &governor, None).run(tasks(4), &sink).await;

        let events = drain(&mut rx);
        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Progress { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect();
        assert_eq!(progress, [1, 2, 3, 4]);
        let finished: Vec<_> = events.iter().filter(|e| matches!(e, RunEvent::Finished { .. })).collect();
        assert_eq!(finished, [&RunEvent::Finished { completed: 4, total: 4 }]);

        // A task is running before it is terminal, and never after.
        let task_two: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::TaskUpdated { result } if result.task_id == 2 => Some(result.status),
                _ => None,
            })
            .collect();
        assert_eq!(task_two, [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Success]);
    }

    #[tokio::test]
    async fn empty_batch_finishes_immediately() {
        let generator = Arc::new(ScriptedGenerator::new());
        let governor = Arc::new(RateGovernor::new());
        let outcome = runner(&generator, &governor, None).run(Vec::new(), &EventSink::discard()).await;
        assert_eq!((outcome.total, outcome.completed), (0, 0));
        assert!(generator.calls().is_empty());
    }
}
