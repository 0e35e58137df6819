//! Continuous collection: run one ingest+ETL cycle, wait, repeat until an
//! interrupt is requested.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

use super::Shutdown;

/// Run `cycle` every `interval` until `shutdown` is requested, returning the
/// number of cycles started. A failed cycle is logged and the loop waits for
/// the next one; an interrupt during a cycle lets it finish first.
pub async fn run_cycles<F, Fut, T, E>(
    interval: Duration,
    shutdown: &Shutdown,
    mut cycle: F,
) -> u64
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    info!(interval_secs = interval.as_secs(), "starting continuous monitoring");
    let mut cycles = 0;
    while !shutdown.is_requested() {
        cycles += 1;
        info!(cycle = cycles, "monitoring cycle started");
        match cycle(cycles).await {
            Ok(_) => info!(cycle = cycles, "monitoring cycle finished"),
            Err(e) => error!(cycle = cycles, error = %e, "monitoring cycle failed"),
        }
        if shutdown.is_requested() {
            break;
        }
        info!(next_in_secs = interval.as_secs(), "waiting for next cycle");
        if !shutdown.sleep(interval).await {
            break;
        }
    }
    info!(cycles, "monitoring stopped");
    cycles
}
