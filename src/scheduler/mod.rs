//! Scheduler module for running monitoring cycles.
//!
//! A cycle reads the open incidents, probes every monitor, reconciles, writes the
//! incident changes and ping rows, and sends notifications. Cycles never overlap:
//! the next one starts a fixed delay after the previous one completed.
//!
//! The writes of one cycle are not atomic. A crash between them can leave incident
//! rows updated without the matching ping rows; the next run re-reads open
//! incidents from storage and carries on from there.

mod cycle;
mod reconcile;

pub use cycle::*;
pub use reconcile::*;

use crate::db::{DbError, Incident, Persistence};
use crate::monitor::{Monitor, Status};
use crate::notify::{Notifier, NotifyError, OpenedIncident};
use crate::probe::{Outcome, Prober};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Failures that end the scheduler. They are not retried here.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] DbError),
    #[error("notification failure: {0}")]
    Notify(#[from] NotifyError),
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub down: usize,
    pub degraded: usize,
    pub opened: Vec<Incident>,
    pub closed: Vec<Incident>,
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub concurrency: usize,
}

/// Drives monitoring cycles one after another.
pub struct Scheduler<S, N, P> {
    monitors: Arc<[Monitor]>,
    store: Arc<S>,
    notifier: Arc<N>,
    prober: Arc<P>,
    config: SchedulerConfig,
}

impl<S, N, P> Scheduler<S, N, P>
where
    S: Persistence,
    N: Notifier,
    P: Prober,
{
    pub fn new(
        monitors: Arc<[Monitor]>,
        store: Arc<S>,
        notifier: Arc<N>,
        prober: Arc<P>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            monitors,
            store,
            notifier,
            prober,
            config,
        }
    }

    /// Run cycles until `shutdown` fires or a cycle fails.
    ///
    /// Shutdown is only observed between cycles; a running cycle always completes.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), CycleError> {
        tracing::info!(
            "Starting scheduler with {} monitors (interval {:?}, concurrency {})",
            self.monitors.len(),
            self.config.interval,
            self.config.concurrency
        );

        loop {
            let report = self.run_once().await?;
            tracing::info!(
                "Cycle complete: {} probed, {} down, {} degraded, {} opened, {} closed",
                report.probed,
                report.down,
                report.degraded,
                report.opened.len(),
                report.closed.len()
            );

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Scheduler: shutdown requested, stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Execute a single cycle.
    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        let open = self.store.list_open_incidents().await?;

        let outcomes = run_cycle(&self.monitors, self.prober.clone(), self.config.concurrency).await;

        let now = Utc::now();
        let plan = reconcile(&outcomes, &open, now);
        if plan.is_quiet() {
            tracing::debug!("No incident transitions this cycle");
        }

        let mut opened = Vec::new();
        if !plan.to_open.is_empty() {
            opened = self.store.insert_incidents(&plan.to_open).await?;
            tracing::info!("Opened {} incidents", opened.len());

            let notices = opened_notices(&opened, &outcomes);
            self.notifier.notify_opened(&notices).await?;
        }

        let mut closed = Vec::new();
        if !plan.to_close.is_empty() {
            closed = self.store.close_incidents(&plan.to_close, now).await?;
            tracing::info!("Closed {} incidents", closed.len());

            if !closed.is_empty() {
                self.notifier.notify_closed(&closed).await?;
            }
        }

        let pings = plan.ping_results(&outcomes, &opened, now);
        self.store.insert_ping_results(&pings).await?;

        Ok(CycleReport {
            probed: outcomes.len(),
            down: outcomes.iter().filter(|o| o.is_down()).count(),
            degraded: outcomes
                .iter()
                .filter(|o| o.status == Status::Degraded)
                .count(),
            opened,
            closed,
        })
    }
}

fn opened_notices(opened: &[Incident], outcomes: &[Outcome]) -> Vec<OpenedIncident> {
    opened
        .iter()
        .map(|incident| {
            let outcome = outcomes.iter().find(|o| o.monitor_name == incident.monitor_name);
            OpenedIncident {
                incident: incident.clone(),
                message: outcome.and_then(|o| o.message.clone()),
                status_code: outcome.map(|o| o.status_code).unwrap_or(0),
                response_time: outcome.map(|o| o.response_time_ms()).unwrap_or(0),
            }
        })
        .collect()
}
