use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Enforces a minimum pause between consecutive calls.
///
/// The pause is measured from the moment the previous call's guard is
/// dropped, so slow calls never eat into the next one's quota.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_release: Mutex<Option<Instant>>,
}

/// Held for the duration of one rate-limited call.
pub struct RateLimitGuard<'a> {
    slot: MutexGuard<'a, Option<Instant>>,
}

impl Drop for RateLimitGuard<'_> {
    fn drop(&mut self) {
        *self.slot = Some(Instant::now());
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_release: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the interval since the last release has elapsed. The first
    /// call never waits.
    pub async fn acquire(&self) -> RateLimitGuard<'_> {
        let slot = self.last_release.lock().await;
        if let Some(last) = *slot {
            let ready_at = last + self.min_interval;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        RateLimitGuard { slot }
    }
}
