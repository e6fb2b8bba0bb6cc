//! Monitor definitions.
//!
//! A monitor pairs a request description with a validator closure that judges the
//! response. Monitors are built once at startup, checked against the allowed
//! ranges below, and never mutated afterwards.

pub mod loader;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

pub const MIN_DEGRADED_THRESHOLD: Duration = Duration::from_millis(10);
pub const MAX_DEGRADED_THRESHOLD: Duration = MAX_TIMEOUT;

pub const MAX_RETRIES: u32 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Monitor definition errors. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("monitor name must not be empty")]
    EmptyName,
    #[error("monitor {0:?} is defined more than once")]
    DuplicateName(String),
    #[error("monitor {monitor:?}: invalid url: {reason}")]
    InvalidUrl { monitor: String, reason: String },
    #[error("monitor {monitor:?}: {field} {value} is outside {min}..={max}")]
    OutOfRange {
        monitor: String,
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },
    #[error("monitor {monitor:?}: invalid header {header:?}")]
    InvalidHeader { monitor: String, header: String },
    #[error("monitor {monitor:?}: environment variable {var} is not set")]
    MissingEnv { monitor: String, var: String },
    #[error("monitor {monitor:?}: invalid body pattern: {reason}")]
    InvalidPattern { monitor: String, reason: String },
    #[error("failed to read monitor file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse monitor file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// HTTP method used by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        }
    }
}

/// Request body sent with a probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Text(String),
}

/// A completed HTTP response, as seen by a validator.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
    pub headers: HeaderMap,
}

/// Verdict of a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Success,
    Failure(String),
}

impl Validation {
    pub fn failure(message: impl Into<String>) -> Self {
        Validation::Failure(message.into())
    }
}

/// Pluggable response judge.
pub type Validator = Arc<dyn Fn(&ProbeResponse) -> Validation + Send + Sync>;

/// Derived health of a monitor for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Operational,
    Degraded,
    Down,
}

impl Status {
    /// Classify a response that passed validation.
    ///
    /// Without a threshold a monitor is never degraded.
    pub fn classify(degraded_threshold: Option<Duration>, response_time: Duration) -> Self {
        match degraded_threshold {
            Some(threshold) if response_time > threshold => Status::Degraded,
            _ => Status::Operational,
        }
    }

    pub fn is_down(self) -> bool {
        self == Status::Down
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Operational => "operational",
            Status::Degraded => "degraded",
            Status::Down => "down",
        };
        f.write_str(s)
    }
}

/// An immutable, validated monitor.
#[derive(Clone)]
pub struct Monitor {
    pub name: String,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub timeout: Duration,
    pub degraded_threshold: Option<Duration>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    validator: Validator,
}

impl Monitor {
    pub fn builder(name: impl Into<String>, url: impl Into<String>) -> MonitorBuilder {
        MonitorBuilder::new(name, url)
    }

    /// Run the validator against a completed response.
    pub fn validate(&self, response: &ProbeResponse) -> Validation {
        (self.validator)(response)
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("degraded_threshold", &self.degraded_threshold)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// Accepts any 2xx response.
pub fn expect_success_status() -> Validator {
    Arc::new(|resp: &ProbeResponse| {
        if (200..300).contains(&resp.status) {
            Validation::Success
        } else {
            Validation::failure(format!("Status code {} is not 2xx", resp.status))
        }
    })
}

/// Builder applying defaults and range checks.
pub struct MonitorBuilder {
    name: String,
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<Body>,
    timeout: Duration,
    degraded_threshold: Option<Duration>,
    max_retries: u32,
    retry_delay: Duration,
    validator: Option<Validator>,
}

impl MonitorBuilder {
    fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: Method::default(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
            degraded_threshold: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            validator: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(Body::Text(body.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn degraded_threshold(mut self, threshold: Duration) -> Self {
        self.degraded_threshold = Some(threshold);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&ProbeResponse) -> Validation + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Monitor, MonitorError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(MonitorError::EmptyName);
        }

        let url = Url::parse(&self.url).map_err(|e| MonitorError::InvalidUrl {
            monitor: name.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(MonitorError::InvalidUrl {
                monitor: name,
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        check_range(&name, "timeout", self.timeout, MIN_TIMEOUT, MAX_TIMEOUT)?;
        if let Some(threshold) = self.degraded_threshold {
            check_range(
                &name,
                "degraded threshold",
                threshold,
                MIN_DEGRADED_THRESHOLD,
                MAX_DEGRADED_THRESHOLD,
            )?;
        }
        if self.max_retries > MAX_RETRIES {
            return Err(MonitorError::OutOfRange {
                monitor: name,
                field: "max retries",
                value: self.max_retries.to_string(),
                min: "0".to_string(),
                max: MAX_RETRIES.to_string(),
            });
        }
        check_range(&name, "retry delay", self.retry_delay, MIN_RETRY_DELAY, MAX_RETRY_DELAY)?;

        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                MonitorError::InvalidHeader {
                    monitor: name.clone(),
                    header: key.clone(),
                }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| MonitorError::InvalidHeader {
                    monitor: name.clone(),
                    header: key.clone(),
                })?;
            headers.insert(header_name, header_value);
        }

        Ok(Monitor {
            name,
            url,
            method: self.method,
            headers,
            body: self.body,
            timeout: self.timeout,
            degraded_threshold: self.degraded_threshold,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            validator: self.validator.unwrap_or_else(expect_success_status),
        })
    }
}

fn check_range(
    monitor: &str,
    field: &'static str,
    value: Duration,
    min: Duration,
    max: Duration,
) -> Result<(), MonitorError> {
    if value < min || value > max {
        return Err(MonitorError::OutOfRange {
            monitor: monitor.to_string(),
            field,
            value: format!("{:?}", value),
            min: format!("{:?}", min),
            max: format!("{:?}", max),
        });
    }
    Ok(())
}

/// Check set-level constraints: names are unique.
pub fn validate_monitor_set(monitors: &[Monitor]) -> Result<(), MonitorError> {
    let mut seen = HashSet::new();
    for monitor in monitors {
        if !seen.insert(monitor.name.as_str()) {
            return Err(MonitorError::DuplicateName(monitor.name.clone()));
        }
    }
    Ok(())
}
