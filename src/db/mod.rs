//! Database module for ping-status.
//!
//! Defines the persistence contract the scheduler relies on and a SQLite store
//! implementing it.

mod models;
mod store;

pub use models::*;
pub use store::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage of incidents and ping rows.
///
/// Any error returned here is treated by the scheduler as fatal.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// All incidents whose `closed_at` is unset.
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, DbError>;

    /// Insert new incidents and return them with their ids.
    async fn insert_incidents(&self, drafts: &[IncidentDraft]) -> Result<Vec<Incident>, DbError>;

    /// Close the given incidents. Returns the incidents that were still open and
    /// are now closed.
    async fn close_incidents(
        &self,
        ids: &[i64],
        closed_at: DateTime<Utc>,
    ) -> Result<Vec<Incident>, DbError>;

    async fn insert_ping_results(&self, pings: &[PingResultDraft]) -> Result<(), DbError>;
}
