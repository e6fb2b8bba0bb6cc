//! HTTP probe implementation.

use super::{retry_attempts, Outcome, ProbeError, Prober};
use crate::monitor::{Body, Monitor, ProbeResponse};

use async_trait::async_trait;
use std::time::Duration;

/// Upper bound of the random delay before a probe's first attempt.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(100);

/// Response bodies beyond this many bytes are not read; validators see the prefix.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Probes monitors over HTTP with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    max_jitter: Duration,
}

impl HttpProber {
    pub fn new(max_jitter: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ping-status/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client, max_jitter })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, monitor: &Monitor) -> Outcome {
        // Add jitter to avoid thundering herd
        let max_jitter = self.max_jitter.as_millis() as u64;
        if max_jitter > 0 {
            let jitter = rand::random::<u64>() % max_jitter;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let attempt = retry_attempts(monitor.max_retries, monitor.retry_delay, || {
            run_http_attempt(&self.client, monitor)
        })
        .await;

        match attempt.result {
            Ok(response) => Outcome::from_response(monitor, &response, attempt.elapsed),
            Err(e) => {
                tracing::warn!(
                    "Probe for {} failed after {} attempt(s): {}",
                    monitor.name,
                    attempt.attempts,
                    e
                );
                Outcome::transport_failure(monitor, &e, attempt.attempts, attempt.elapsed)
            }
        }
    }
}

/// Issue one request for the monitor and read the full body, bounded by its timeout.
pub async fn run_http_attempt(
    client: &reqwest::Client,
    monitor: &Monitor,
) -> Result<ProbeResponse, ProbeError> {
    let mut request = client
        .request(monitor.method.into(), monitor.url.clone())
        .headers(monitor.headers.clone());

    request = match &monitor.body {
        Some(Body::Json(value)) => request.json(value),
        Some(Body::Text(text)) => request.body(text.clone()),
        None => request,
    };

    let exchange = async {
        let mut response = request.send().await.map_err(|e| map_reqwest_error(e, monitor.timeout))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        // Read the body to measure transfer time, up to MAX_BODY_BYTES
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(e, monitor.timeout))?
        {
            let room = MAX_BODY_BYTES - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok::<_, ProbeError>(ProbeResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
            headers,
        })
    };

    match tokio::time::timeout(monitor.timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(monitor.timeout)),
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}
