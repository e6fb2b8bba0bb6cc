//! SQLite database store implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::Persistence;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Run migrations inline (embedded SQL)
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    // --- Incidents ---

    /// Get all open incidents.
    pub fn get_open_incidents(&self) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, monitor_name, opened_at, closed_at FROM incident WHERE closed_at IS NULL ORDER BY id",
        )?;

        let incidents = stmt
            .query_map([], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(incidents)
    }

    /// Add incidents in batch and return them with their ids.
    pub fn add_incidents(&self, drafts: &[IncidentDraft]) -> Result<Vec<Incident>, DbError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut incidents = Vec::with_capacity(drafts.len());

        {
            let mut stmt =
                tx.prepare("INSERT INTO incident (monitor_name, opened_at) VALUES (?1, ?2)")?;

            for d in drafts {
                stmt.execute(params![d.monitor_name, format_db_time(d.opened_at)])?;
                incidents.push(Incident {
                    id: tx.last_insert_rowid(),
                    monitor_name: d.monitor_name.clone(),
                    opened_at: d.opened_at,
                    closed_at: None,
                });
            }
        }

        tx.commit()?;
        Ok(incidents)
    }

    /// Close incidents that are still open; already-closed ids are skipped.
    pub fn close_incidents_at(
        &self,
        ids: &[i64],
        closed_at: DateTime<Utc>,
    ) -> Result<Vec<Incident>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut closed = Vec::with_capacity(ids.len());

        {
            let mut stmt = tx.prepare(
                "UPDATE incident SET closed_at = ?1 WHERE id = ?2 AND closed_at IS NULL
                 RETURNING id, monitor_name, opened_at, closed_at",
            )?;

            for id in ids {
                let row = stmt
                    .query_row(params![format_db_time(closed_at), id], incident_from_row)
                    .optional()?;
                if let Some(incident) = row {
                    closed.push(incident);
                }
            }
        }

        tx.commit()?;
        Ok(closed)
    }

    // --- Ping Results ---

    /// Add ping results in batch.
    pub fn add_ping_results(&self, results: &[PingResultDraft]) -> Result<(), DbError> {
        if results.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO ping_result (monitor_name, success, message, response_time, status, created_at, incident_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for r in results {
                stmt.execute(params![
                    r.monitor_name,
                    r.success,
                    r.message,
                    r.response_time_ms,
                    r.status_code,
                    format_db_time(r.created_at),
                    r.incident_id,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn get_ping_results(&self, monitor_name: &str) -> Result<Vec<PingResult>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, monitor_name, success, message, response_time, status, created_at, incident_id
             FROM ping_result WHERE monitor_name = ?1 ORDER BY id",
        )?;

        let results = stmt
            .query_map(params![monitor_name], |row| {
                Ok(PingResult {
                    id: row.get(0)?,
                    monitor_name: row.get(1)?,
                    success: row.get(2)?,
                    message: row.get(3)?,
                    response_time_ms: row.get(4)?,
                    status_code: row.get(5)?,
                    created_at: time_column(row, 6)?,
                    incident_id: row.get(7)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    #[cfg(test)]
    pub fn get_incidents(&self, monitor_name: &str) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, monitor_name, opened_at, closed_at FROM incident WHERE monitor_name = ?1 ORDER BY id",
        )?;

        let incidents = stmt
            .query_map(params![monitor_name], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(incidents)
    }
}

#[async_trait]
impl Persistence for Store {
    async fn list_open_incidents(&self) -> Result<Vec<Incident>, DbError> {
        self.get_open_incidents()
    }

    async fn insert_incidents(&self, drafts: &[IncidentDraft]) -> Result<Vec<Incident>, DbError> {
        self.add_incidents(drafts)
    }

    async fn close_incidents(
        &self,
        ids: &[i64],
        closed_at: DateTime<Utc>,
    ) -> Result<Vec<Incident>, DbError> {
        self.close_incidents_at(ids, closed_at)
    }

    async fn insert_ping_results(&self, pings: &[PingResultDraft]) -> Result<(), DbError> {
        self.add_ping_results(pings)
    }
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let closed_at: Option<String> = row.get(3)?;
    let closed_at = match closed_at {
        Some(s) => Some(parse_db_time(&s).ok_or_else(|| invalid_time(3, &s))?),
        None => None,
    };

    Ok(Incident {
        id: row.get(0)?,
        monitor_name: row.get(1)?,
        opened_at: time_column(row, 2)?,
        closed_at,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| invalid_time(idx, &s))
}

fn invalid_time(idx: usize, s: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("invalid timestamp {:?}", s).into(),
    )
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn draft(name: &str, at: DateTime<Utc>) -> IncidentDraft {
        IncidentDraft {
            monitor_name: name.to_string(),
            opened_at: at,
        }
    }

    #[test]
    fn test_incident_lifecycle() {
        let (_tmp, store) = store();
        let opened_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let inserted = store
            .add_incidents(&[draft("Website", opened_at), draft("API", opened_at)])
            .unwrap();
        assert_eq!(inserted.len(), 2);
        assert!(inserted.iter().all(|i| i.id > 0 && i.is_open()));

        let open = store.get_open_incidents().unwrap();
        assert_eq!(open, inserted);

        let closed_at = opened_at + ChronoDuration::minutes(3);
        let closed = store.close_incidents_at(&[inserted[0].id], closed_at).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].monitor_name, "Website");
        assert_eq!(closed[0].closed_at, Some(closed_at));

        let open = store.get_open_incidents().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].monitor_name, "API");
    }

    #[test]
    fn test_closing_twice_is_a_noop() {
        let (_tmp, store) = store();
        let now = Utc::now();
        let inserted = store.add_incidents(&[draft("Website", now)]).unwrap();

        assert_eq!(store.close_incidents_at(&[inserted[0].id], now).unwrap().len(), 1);
        assert!(store.close_incidents_at(&[inserted[0].id], now).unwrap().is_empty());
        assert!(store.close_incidents_at(&[9999], now).unwrap().is_empty());
    }

    #[test]
    fn test_second_open_incident_for_monitor_is_rejected() {
        let (_tmp, store) = store();
        let now = Utc::now();
        store.add_incidents(&[draft("Website", now)]).unwrap();

        let err = store.add_incidents(&[draft("Website", now)]);
        assert!(matches!(err, Err(DbError::Sqlite(_))));
        assert_eq!(store.get_open_incidents().unwrap().len(), 1);

        // A closed incident no longer blocks a new one.
        let open = store.get_open_incidents().unwrap();
        store.close_incidents_at(&[open[0].id], now).unwrap();
        tokio_test::assert_ok!(store.add_incidents(&[draft("Website", now)]));
        assert_eq!(store.get_incidents("Website").unwrap().len(), 2);
    }

    #[test]
    fn test_ping_results_round_trip() {
        let (_tmp, store) = store();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let incident = store.add_incidents(&[draft("API", now)]).unwrap().remove(0);

        store
            .add_ping_results(&[
                PingResultDraft {
                    monitor_name: "API".to_string(),
                    success: false,
                    message: Some("Status code is not 200".to_string()),
                    response_time_ms: 87,
                    status_code: 503,
                    created_at: now,
                    incident_id: Some(incident.id),
                },
                PingResultDraft {
                    monitor_name: "Website".to_string(),
                    success: true,
                    message: None,
                    response_time_ms: 12,
                    status_code: 200,
                    created_at: now,
                    incident_id: None,
                },
            ])
            .unwrap();

        let api = store.get_ping_results("API").unwrap();
        assert_eq!(api.len(), 1);
        assert_eq!(api[0].status_code, 503);
        assert_eq!(api[0].incident_id, Some(incident.id));
        assert_eq!(api[0].created_at, now);
        assert!(!api[0].success);

        let web = store.get_ping_results("Website").unwrap();
        assert_eq!(web[0].incident_id, None);
        assert_eq!(web[0].message, None);
    }

    #[test]
    fn test_ping_with_unknown_incident_is_rejected() {
        let (_tmp, store) = store();
        let result = store.add_ping_results(&[PingResultDraft {
            monitor_name: "API".to_string(),
            success: false,
            message: None,
            response_time_ms: 1,
            status_code: 0,
            created_at: Utc::now(),
            incident_id: Some(42),
        }]);
        assert!(result.is_err());
        assert!(store.get_ping_results("API").unwrap().is_empty());
    }

    #[test]
    fn test_reopen_existing_database() {
        let tmp = NamedTempFile::new().unwrap();
        let now = Utc::now();
        {
            let store = Store::new(tmp.path()).unwrap();
            store.add_incidents(&[draft("Website", now)]).unwrap();
        }
        let store = Store::new(tmp.path()).unwrap();
        assert_eq!(store.get_open_incidents().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_db_time_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_db_time("2025-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_db_time("2025-01-02 03:04:05.000000000"), Some(expected));
        assert_eq!(parse_db_time("2025-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_db_time("yesterday"), None);
    }
}
