//! Shared server state and the route table.
use axum::routing::{get, post};
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::api::handlers;
use crate::orchestrator::Orchestrator;
use crate::prompt::library::TemplateLibrary;
use crate::runner::{RunEvent, RunSnapshot};

/// Finished runs kept before the oldest ones are evicted.
pub const MAX_TRACKED_RUNS: usize = 32;

/// Snapshots of server-side runs, oldest first. Once `capacity` is reached the
/// oldest finished runs are dropped to make room; runs still in progress are
/// never evicted.
#[derive(Debug)]
pub struct RunRegistry {
    capacity: usize,
    order: VecDeque<Uuid>,
    snapshots: HashMap<Uuid, RunSnapshot>,
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        RunRegistry { capacity: capacity.max(1), order: VecDeque::new(), snapshots: HashMap::new() }
    }

    pub fn insert(&mut self, run_id: Uuid) {
        while self.snapshots.len() >= self.capacity {
            let Some(position) = self
                .order
                .iter()
                .position(|id| self.snapshots.get(id).map(|s| s.finished).unwrap_or(true))
            else {
                break;
            };
            if let Some(evicted) = self.order.remove(position) {
                self.snapshots.remove(&evicted);
                tracing::debug!(run_id = %evicted, "Evicted finished run");
            }
        }
        self.order.push_back(run_id);
        self.snapshots.insert(run_id, RunSnapshot::default());
    }

    pub fn get(&self, run_id: &Uuid) -> Option<&RunSnapshot> {
        self.snapshots.get(run_id)
    }

    pub fn get_mut(&mut self, run_id: &Uuid) -> Option<&mut RunSnapshot> {
        self.snapshots.get_mut(run_id)
    }

    pub fn remove(&mut self, run_id: &Uuid) -> Option<RunSnapshot> {
        self.order.retain(|id| id != run_id);
        self.snapshots.remove(run_id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub templates: RwLock<TemplateLibrary>,
    pub runs: RwLock<RunRegistry>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, templates: TemplateLibrary) -> Self {
        AppState::with_run_capacity(orchestrator, templates, MAX_TRACKED_RUNS)
    }

    pub fn with_run_capacity(orchestrator: Orchestrator, templates: TemplateLibrary, capacity: usize) -> Self {
        AppState {
            orchestrator,
            templates: RwLock::new(templates),
            runs: RwLock::new(RunRegistry::new(capacity)),
        }
    }

    /// Register a run under a fresh id and fold its events into that run's
    /// snapshot until the stream ends. Events only ever touch their own id,
    /// and stop being applied once the run is evicted or deleted.
    pub async fn track_run(self: &Arc<Self>, mut events: UnboundedReceiver<RunEvent>) -> Uuid {
        let run_id = Uuid::new_v4();
        self.runs.write().await.insert(run_id);
        let state = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(snapshot) = state.runs.write().await.get_mut(&run_id) {
                    snapshot.apply(&event);
                }
            }
            tracing::debug!(%run_id, "Run event stream closed");
        });
        run_id
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/rate", get(handlers::rate_status))
        .route("/templates", get(handlers::list_templates))
        .route("/templates/:name", get(handlers::get_template))
        .route("/generate", post(handlers::generate))
        .route("/batches", post(handlers::create_batch))
        .route("/variations", post(handlers::create_variations))
        .route("/runs/:id", get(handlers::get_run).delete(handlers::delete_run))
        .route("/enhance", post(handlers::enhance))
        .route("/validate_key", post(handlers::validate_key))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish(registry: &mut RunRegistry, run_id: &Uuid) {
        if let Some(snapshot) = registry.get_mut(run_id) {
            snapshot.apply(&RunEvent::Finished { completed: 0, total: 0 });
        }
    }

    #[test]
    fn evicts_oldest_finished_runs_at_capacity() {
        let mut registry = RunRegistry::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        registry.insert(a);
        registry.insert(b);
        finish(&mut registry, &b);

        registry.insert(c);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&a).is_some(), "runs in progress are kept");
        assert!(registry.get(&b).is_none());
        assert!(registry.get(&c).is_some());
    }

    #[test]
    fn grows_past_capacity_only_while_everything_is_running() {
        let mut registry = RunRegistry::new(1);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        registry.insert(a);
        registry.insert(b);
        assert_eq!(registry.len(), 2);

        finish(&mut registry, &a);
        finish(&mut registry, &b);
        let c = Uuid::new_v4();
        registry.insert(c);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&c).is_some());

        assert!(registry.remove(&c).is_some());
        assert!(registry.is_empty());
    }
}
