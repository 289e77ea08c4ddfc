//! Tracks the wall-clock time of the most recent external request so that
//! workers launched with `-idlespan:<seconds>` can self-terminate once the
//! parent has gone quiet for long enough (§4.7).

use std::sync::Arc;
use tokio::sync::RwLock;

/// Monotonic-timestamp-convertible instant of the last external call.
/// `None` is the "never" sentinel, reported as -1 seconds idle.
pub struct ActivityClock {
    last_call: RwLock<Option<std::time::Instant>>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last_call: RwLock::new(None),
        }
    }

    /// Stamp "now" as the most recent external call.
    pub async fn update_last_call(&self) {
        *self.last_call.write().await = Some(std::time::Instant::now());
    }

    /// Seconds since the last external call, or -1 if never stamped.
    pub async fn idle_seconds(&self) -> i64 {
        match *self.last_call.read().await {
            Some(instant) => instant.elapsed().as_secs() as i64,
            None => -1,
        }
    }

    /// True once `update_last_call` has been called at least once. Used by
    /// the lifecycle controller to decide whether a cold, never-requested
    /// pool should have its floor enforced (§4.6).
    pub async fn has_been_called(&self) -> bool {
        self.last_call.read().await.is_some()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedActivityClock = Arc<ActivityClock>;
