//! Incident notifications.
//!
//! The scheduler calls a [`Notifier`] once per cycle for the incidents it opened
//! and once for the incidents it closed, never with an empty list.

mod webhook;

pub use webhook::*;

use crate::db::Incident;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// A freshly opened incident together with the failure that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedIncident {
    #[serde(flatten)]
    pub incident: Incident,
    pub message: Option<String>,
    pub status_code: u16,
    pub response_time: i64,
}

/// Delivers incident transitions.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify_opened(&self, incidents: &[OpenedIncident]) -> Result<(), NotifyError>;

    async fn notify_closed(&self, incidents: &[Incident]) -> Result<(), NotifyError>;
}

/// Writes transitions to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_opened(&self, incidents: &[OpenedIncident]) -> Result<(), NotifyError> {
        for opened in incidents {
            tracing::warn!(
                incident_id = opened.incident.id,
                status_code = opened.status_code,
                response_time_ms = opened.response_time,
                "{} is down: {}",
                opened.incident.monitor_name,
                opened.message.as_deref().unwrap_or("no message")
            );
        }
        Ok(())
    }

    async fn notify_closed(&self, incidents: &[Incident]) -> Result<(), NotifyError> {
        for incident in incidents {
            tracing::info!(
                incident_id = incident.id,
                "{} recovered",
                incident.monitor_name
            );
        }
        Ok(())
    }
}
