// Data pipeline: raw ingestion, per-snapshot ETL and the batch drivers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub mod etl;
pub mod ingestion;
pub mod monitor;
pub mod orchestrator;
pub mod processing;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Cooperative interrupt flag, checked only at entity/file boundaries.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early once an interrupt is requested.
    /// Returns `false` when the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while !self.is_requested() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL)).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_runs_to_the_deadline() {
        let start = Instant::now();
        assert!(Shutdown::new().sleep(Duration::from_secs(90)).await);
        assert!(start.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_wakes_on_interrupt() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.trigger();
        });
        let start = Instant::now();

        assert!(!shutdown.sleep(Duration::from_secs(3600)).await);
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
