//! Probe module for endpoint monitoring.
//!
//! A probe issues a monitor's request with a per-attempt deadline, retries
//! transport failures with a fixed delay, and turns the final attempt into an
//! [`Outcome`]. Transport problems never escape as errors: they become `down`
//! outcomes once the retry budget is spent.

mod http;

pub use http::*;

use crate::monitor::{Monitor, ProbeResponse, Status, Validation};

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result of probing one monitor once per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub monitor_name: String,
    pub status: Status,
    pub message: Option<String>,
    /// HTTP status code, or 0 when no response was ever received.
    pub status_code: u16,
    pub response_time: Duration,
}

impl Outcome {
    /// Build the outcome for a completed response.
    ///
    /// The validator runs exactly once; its failure is final for this cycle.
    /// Response time is truncated to whole milliseconds before classification,
    /// so the status always agrees with the stored value.
    pub fn from_response(monitor: &Monitor, response: &ProbeResponse, elapsed: Duration) -> Self {
        let elapsed = whole_millis(elapsed);
        let (status, message) = match monitor.validate(response) {
            Validation::Success => {
                let status = Status::classify(monitor.degraded_threshold, elapsed);
                let message = match (status, monitor.degraded_threshold) {
                    (Status::Degraded, Some(threshold)) => Some(format!(
                        "Response time {}ms exceeded degraded threshold {}ms",
                        elapsed.as_millis(),
                        threshold.as_millis()
                    )),
                    _ => None,
                };
                (status, message)
            }
            Validation::Failure(message) => (Status::Down, Some(message)),
        };

        Self {
            monitor_name: monitor.name.clone(),
            status,
            message,
            status_code: response.status,
            response_time: elapsed,
        }
    }

    /// Build the outcome for a monitor whose every attempt failed in transport.
    pub fn transport_failure(
        monitor: &Monitor,
        error: &ProbeError,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            monitor_name: monitor.name.clone(),
            status: Status::Down,
            message: Some(format!(
                "request failed after {} attempt(s): {}",
                attempts, error
            )),
            status_code: 0,
            response_time: whole_millis(elapsed),
        }
    }

    pub fn success(&self) -> bool {
        !self.status.is_down()
    }

    pub fn is_down(&self) -> bool {
        self.status.is_down()
    }

    pub fn response_time_ms(&self) -> i64 {
        i64::try_from(self.response_time.as_millis()).unwrap_or(i64::MAX)
    }
}

fn whole_millis(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Executes one probe of one monitor.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, monitor: &Monitor) -> Outcome;
}

/// The attempt that decided a retried operation.
#[derive(Debug)]
pub struct Attempt<T> {
    pub result: Result<T, ProbeError>,
    /// Duration of the deciding attempt only.
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Run `attempt` up to `max_retries + 1` times, sleeping `retry_delay` between failures.
pub async fn retry_attempts<T, F, Fut>(
    max_retries: u32,
    retry_delay: Duration,
    mut attempt: F,
) -> Attempt<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let start = Instant::now();
        let result = attempt().await;
        let elapsed = start.elapsed();

        match result {
            Ok(value) => {
                return Attempt {
                    result: Ok(value),
                    elapsed,
                    attempts,
                }
            }
            Err(e) if attempts > max_retries => {
                return Attempt {
                    result: Err(e),
                    elapsed,
                    attempts,
                }
            }
            Err(e) => {
                tracing::debug!("Attempt {} failed, retrying in {:?}: {}", attempts, retry_delay, e);
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
