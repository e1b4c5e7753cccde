//! Local approximation of the upstream 60-requests-per-minute budget.
//!
//! Purely advisory: nothing here blocks. Runners record each dispatch, the
//! orchestrator refuses new runs while a cooldown is active, and a once-per-second
//! ticker prunes the window and counts the cooldown down.
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const REQUESTS_PER_WINDOW: usize = 60;
pub const WINDOW: Duration = Duration::from_secs(60);
pub const COOLDOWN_SECONDS: u32 = 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads tokio's clock, so paused test time applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateStatus {
    pub used: usize,
    pub remaining: usize,
    pub cooldown_seconds: u32,
}

#[derive(Default)]
struct WindowState {
    timestamps: VecDeque<Instant>,
    cooldown_remaining: u32,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) < WINDOW {
                break;
            }
            self.timestamps.pop_front();
        }
    }
}

pub struct RateGovernor {
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

impl RateGovernor {
    pub fn new() -> Self {
        RateGovernor::with_clock(Arc::new(TokioClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        RateGovernor { clock, state: Mutex::new(WindowState::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_request(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now);
        state.timestamps.push_back(now);
        tracing::debug!(used = state.timestamps.len(), "Recorded request");
    }

    pub fn used(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now);
        state.timestamps.len()
    }

    pub fn remaining(&self) -> usize {
        REQUESTS_PER_WINDOW.saturating_sub(self.used())
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.lock().cooldown_remaining
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_remaining() > 0
    }

    pub fn trigger_cooldown(&self) {
        self.lock().cooldown_remaining = COOLDOWN_SECONDS;
        tracing::warn!("Quota exhausted, cooling down for {}s", COOLDOWN_SECONDS);
    }

    /// One second of the periodic driver.
    pub fn tick(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now);
        if state.cooldown_remaining > 0 {
            state.cooldown_remaining -= 1;
        }
    }

    pub fn status(&self) -> RateStatus {
        let used = self.used();
        RateStatus {
            used,
            remaining: REQUESTS_PER_WINDOW.saturating_sub(used),
            cooldown_seconds: self.cooldown_remaining(),
        }
    }

    /// Spawn the once-per-second driver. Abort the handle to stop it.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                governor.tick();
            }
        })
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}
