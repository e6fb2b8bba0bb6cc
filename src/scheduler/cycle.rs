//! Concurrent fan-out of probes over the monitor set.

use crate::monitor::Monitor;
use crate::probe::{Outcome, Prober};

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Probe every monitor once, with at most `concurrency` probes in flight.
///
/// Returns one outcome per monitor, in completion order.
pub async fn run_cycle<P: Prober>(
    monitors: &[Monitor],
    prober: Arc<P>,
    concurrency: usize,
) -> Vec<Outcome> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for monitor in monitors {
        let monitor = monitor.clone();
        let prober = prober.clone();
        let semaphore = semaphore.clone();

        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = prober.probe(&monitor).await;
            tracing::debug!(
                "{}: {} ({}, {}ms)",
                monitor.name,
                outcome.status,
                outcome.status_code,
                outcome.response_time_ms()
            );
            outcome
        });
    }

    let mut outcomes = Vec::with_capacity(monitors.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => tracing::error!("Probe task cancelled: {}", e),
        }
    }

    outcomes
}
