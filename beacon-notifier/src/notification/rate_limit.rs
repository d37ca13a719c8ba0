//! Per-subscription delivery cooldown.
//!
//! The cooldown is enforced inside each detector's query: a subscription is
//! only eligible when its `last_sent_ts` is missing or strictly older than
//! `now - window`. This type computes that cutoff.

use std::time::Duration;

/// Default minimum time between two deliveries for the same subscription.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    window: Duration,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Cutoff in Unix epoch milliseconds for a query evaluated at `now_ms`.
    pub fn cutoff_ms(&self, now_ms: i64) -> i64 {
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(window_ms)
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
