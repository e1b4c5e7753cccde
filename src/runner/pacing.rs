use std::time::Duration;

/// Fixed spacing between upstream dispatches.
pub const DEFAULT_DISPATCH_DELAY: Duration = Duration::from_millis(1100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    delay: Duration,
}

impl Pacing {
    pub fn new(delay: Duration) -> Self {
        Pacing { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::new(DEFAULT_DISPATCH_DELAY)
    }
}
