//! Configuration module for ping-status.
//!
//! Loads process-wide settings from environment variables with sensible defaults.
//! The monitor set itself lives in a separate definition file, see `monitor::loader`.

use std::env;
use std::time::Duration;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the SQLite database file (default: "ping-status.db")
    pub db_path: String,
    /// Path to the JSON monitor definitions (default: "monitors.json")
    pub monitors_path: String,
    /// Delay between the end of one cycle and the start of the next (default: 1 minute)
    pub cycle_interval: Duration,
    /// Maximum number of probes in flight at once (default: 5)
    pub concurrency: usize,
    /// Webhook receiving incident notifications; incidents are only logged when unset
    pub webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "ping-status.db".to_string(),
            monitors_path: "monitors.json".to_string(),
            cycle_interval: Duration::from_secs(60),
            concurrency: 5,
            webhook_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PING_STATUS_DB_PATH`: Database file path (default: "ping-status.db")
    /// - `PING_STATUS_MONITORS`: Monitor definition file (default: "monitors.json")
    /// - `MONITOR_INTERVAL_MINUTES`: Minutes between cycles (default: 1)
    /// - `MONITOR_CONCURRENCY`: Maximum concurrent probes (default: 5)
    /// - `PING_STATUS_WEBHOOK_URL`: Incident webhook (default: unset)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(db_path) = lookup("PING_STATUS_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(monitors_path) = lookup("PING_STATUS_MONITORS") {
            cfg.monitors_path = monitors_path;
        }

        if let Some(minutes) = lookup("MONITOR_INTERVAL_MINUTES") {
            match minutes.trim().parse::<u64>() {
                Ok(m) if m > 0 => cfg.cycle_interval = Duration::from_secs(m * 60),
                _ => tracing::warn!("Ignoring invalid MONITOR_INTERVAL_MINUTES={:?}", minutes),
            }
        }

        if let Some(concurrency) = lookup("MONITOR_CONCURRENCY") {
            match concurrency.trim().parse::<usize>() {
                Ok(c) if c > 0 => cfg.concurrency = c,
                _ => tracing::warn!("Ignoring invalid MONITOR_CONCURRENCY={:?}", concurrency),
            }
        }

        cfg.webhook_url = lookup("PING_STATUS_WEBHOOK_URL").filter(|url| !url.trim().is_empty());

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.db_path, "ping-status.db");
        assert_eq!(cfg.monitors_path, "monitors.json");
        assert_eq!(cfg.cycle_interval, Duration::from_secs(60));
        assert_eq!(cfg.concurrency, 5);
        assert!(cfg.webhook_url.is_none());
    }

    #[test]
    fn test_overrides_from_env() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("PING_STATUS_DB_PATH", "/var/lib/ping.db"),
            ("MONITOR_INTERVAL_MINUTES", "10"),
            ("MONITOR_CONCURRENCY", "12"),
            ("PING_STATUS_WEBHOOK_URL", "https://hooks.example.com/x"),
        ]));
        assert_eq!(cfg.db_path, "/var/lib/ping.db");
        assert_eq!(cfg.cycle_interval, Duration::from_secs(600));
        assert_eq!(cfg.concurrency, 12);
        assert_eq!(cfg.webhook_url.as_deref(), Some("https://hooks.example.com/x"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("MONITOR_INTERVAL_MINUTES", "soon"),
            ("MONITOR_CONCURRENCY", "0"),
            ("PING_STATUS_WEBHOOK_URL", "  "),
        ]));
        assert_eq!(cfg.cycle_interval, Duration::from_secs(60));
        assert_eq!(cfg.concurrency, 5);
        assert!(cfg.webhook_url.is_none());
    }
}
