//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An incident row. `closed_at == None` means the incident is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: i64,
    pub monitor_name: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// A new incident to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentDraft {
    pub monitor_name: String,
    pub opened_at: DateTime<Utc>,
}

/// A ping row to be inserted. Ping rows are never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResultDraft {
    pub monitor_name: String,
    pub success: bool,
    pub message: Option<String>,
    pub response_time_ms: i64,
    /// HTTP status code, 0 when no response was received.
    pub status_code: u16,
    pub created_at: DateTime<Utc>,
    pub incident_id: Option<i64>,
}

/// A stored ping row.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    pub id: i64,
    pub monitor_name: String,
    pub success: bool,
    pub message: Option<String>,
    pub response_time_ms: i64,
    pub status_code: u16,
    pub created_at: DateTime<Utc>,
    pub incident_id: Option<i64>,
}
