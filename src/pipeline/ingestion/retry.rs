use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::app::ports::{EntitySource, Fetched};
use crate::error::FetchError;
use crate::metrics::SourcesMetrics;

/// Bounded retry parameters for one external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay_ms: u64,
    /// Deadline applied to each attempt on its own
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_ms: 1_000,
            timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Default for the enrichment catalog: a single slower attempt.
    pub fn catalog() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 1_000,
            timeout_ms: 15_000,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What a retried fetch degrades to. Never an error: callers treat each
/// source independently.
#[derive(Debug, Clone)]
pub enum SourceOutcome<T> {
    Available { data: T, attempts: u32 },
    Unavailable { attempts: u32, last_error: FetchError },
}

impl<T> SourceOutcome<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, SourceOutcome::Available { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SourceOutcome::Available { attempts, .. }
            | SourceOutcome::Unavailable { attempts, .. } => *attempts,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            SourceOutcome::Available { data, .. } => Some(data),
            SourceOutcome::Unavailable { .. } => None,
        }
    }
}

fn error_type(e: &FetchError) -> &'static str {
    match e {
        FetchError::Network(_) => "network",
        FetchError::Status(_) => "status",
        FetchError::InvalidStructure(_) => "invalid_structure",
        FetchError::Timeout(_) => "timeout",
    }
}

/// Run `op` under `policy`. Each attempt gets its own deadline; the pause
/// only happens between attempts, never after the last one.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    source: &str,
    mut op: F,
) -> SourceOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout(), op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(policy.timeout())),
        };
        match result {
            Ok(data) => {
                debug!(source, attempt, "fetch succeeded");
                SourcesMetrics::record_attempt_success(source, attempt);
                return SourceOutcome::Available {
                    data,
                    attempts: attempt,
                };
            }
            Err(e) => {
                warn!(source, attempt, max_attempts, error = %e, "fetch attempt failed");
                SourcesMetrics::record_attempt_error(source, error_type(&e));
                if attempt >= max_attempts {
                    SourcesMetrics::record_unavailable(source);
                    return SourceOutcome::Unavailable {
                        attempts: attempt,
                        last_error: e,
                    };
                }
                tokio::time::sleep(policy.delay()).await;
            }
        }
    }
}

pub async fn fetch_with_retry<S>(
    source: &S,
    key: &str,
    policy: &RetryPolicy,
) -> SourceOutcome<Fetched<S::Payload>>
where
    S: EntitySource + ?Sized,
{
    with_retry(policy, source.source_name(), |_| source.fetch_once(key)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1_000), Duration::from_millis(10_000))
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: SourceOutcome<()> = with_retry(&fast_policy(2), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Status(503)) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match outcome {
            SourceOutcome::Unavailable { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, FetchError::Status(503));
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_second_attempt() {
        let outcome = with_retry(&fast_policy(2), "test", |attempt| async move {
            if attempt == 1 {
                Err(FetchError::Network("connection reset".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert!(outcome.is_available());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.into_option(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let policy = RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(500));
        let outcome: SourceOutcome<()> = with_retry(&policy, "test", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        match outcome {
            SourceOutcome::Unavailable { last_error, .. } => {
                assert_eq!(last_error, FetchError::Timeout(Duration::from_millis(500)))
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);
        let _: SourceOutcome<()> = with_retry(&fast_policy(0), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Status(500)) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_attempts_only() {
        let start = tokio::time::Instant::now();
        let _: SourceOutcome<()> = with_retry(&fast_policy(3), "test", |_| async {
            Err(FetchError::Status(502))
        })
        .await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2_000));
        assert!(elapsed < Duration::from_millis(3_000));
    }
}
