//! Incident reconciliation.
//!
//! Compares one cycle's outcomes against the currently open incidents and decides
//! which incidents to open, which to close, and which incident each ping row links
//! to. Only the down / not-down boundary moves incidents; `degraded` is recorded on
//! the ping row and nothing else. No storage or network access happens here.

use crate::db::{Incident, IncidentDraft, PingResultDraft};
use crate::probe::Outcome;

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Incident a ping row should reference once the cycle's writes are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// An incident that was already open and stays open.
    Existing(i64),
    /// The incident opened for this monitor in this cycle.
    Opened,
    /// No open incident.
    Unlinked,
}

/// What a cycle has to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub to_open: Vec<IncidentDraft>,
    pub to_close: Vec<i64>,
    /// One entry per outcome, in outcome order.
    pub linkage: Vec<Linkage>,
}

impl Reconciliation {
    pub fn is_quiet(&self) -> bool {
        self.to_open.is_empty() && self.to_close.is_empty()
    }

    /// Build the ping rows for `outcomes`, resolving [`Linkage::Opened`] against the
    /// incidents returned by storage.
    pub fn ping_results(
        &self,
        outcomes: &[Outcome],
        opened: &[Incident],
        created_at: DateTime<Utc>,
    ) -> Vec<PingResultDraft> {
        let opened_by_monitor: HashMap<&str, i64> = opened
            .iter()
            .map(|i| (i.monitor_name.as_str(), i.id))
            .collect();

        outcomes
            .iter()
            .zip(self.linkage.iter())
            .map(|(outcome, link)| {
                let incident_id = match link {
                    Linkage::Existing(id) => Some(*id),
                    Linkage::Opened => opened_by_monitor.get(outcome.monitor_name.as_str()).copied(),
                    Linkage::Unlinked => None,
                };

                PingResultDraft {
                    monitor_name: outcome.monitor_name.clone(),
                    success: outcome.success(),
                    message: outcome.message.clone(),
                    response_time_ms: outcome.response_time_ms(),
                    status_code: outcome.status_code,
                    created_at,
                    incident_id,
                }
            })
            .collect()
    }
}

/// Decide incident transitions for one cycle.
///
/// Open incidents whose monitor produced no outcome this cycle are left alone.
pub fn reconcile(outcomes: &[Outcome], open: &[Incident], now: DateTime<Utc>) -> Reconciliation {
    let open_by_monitor: HashMap<&str, i64> = open
        .iter()
        .filter(|i| i.is_open())
        .map(|i| (i.monitor_name.as_str(), i.id))
        .collect();

    let down: HashSet<&str> = outcomes
        .iter()
        .filter(|o| o.is_down())
        .map(|o| o.monitor_name.as_str())
        .collect();
    let probed: HashSet<&str> = outcomes.iter().map(|o| o.monitor_name.as_str()).collect();

    let mut plan = Reconciliation::default();
    let mut opening: HashSet<&str> = HashSet::new();

    for outcome in outcomes {
        let name = outcome.monitor_name.as_str();
        let link = if !down.contains(name) {
            Linkage::Unlinked
        } else if let Some(&id) = open_by_monitor.get(name) {
            Linkage::Existing(id)
        } else {
            if opening.insert(name) {
                plan.to_open.push(IncidentDraft {
                    monitor_name: outcome.monitor_name.clone(),
                    opened_at: now,
                });
            }
            Linkage::Opened
        };
        plan.linkage.push(link);
    }

    for incident in open.iter().filter(|i| i.is_open()) {
        let name = incident.monitor_name.as_str();
        if probed.contains(name) && !down.contains(name) {
            plan.to_close.push(incident.id);
        }
    }

    plan
}
