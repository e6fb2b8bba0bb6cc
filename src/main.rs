//! ping-status - HTTP endpoint monitoring with incident tracking.
//!
//! Probes a fixed set of monitors on a schedule, records one ping row per monitor
//! per cycle, and opens or closes incidents as monitors go down and recover.

mod config;
mod db;
mod monitor;
mod notify;
mod probe;
mod scheduler;

use config::ServerConfig;
use db::Store;
use notify::{LogNotifier, Notifier, WebhookNotifier};
use probe::{HttpProber, DEFAULT_MAX_JITTER};
use scheduler::{Scheduler, SchedulerConfig};

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("ping_status=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Using database at {}", cfg.db_path);

    let monitors = monitor::loader::load_monitors(&cfg.monitors_path)?;
    tracing::info!("Loaded {} monitors from {}", monitors.len(), cfg.monitors_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let prober = Arc::new(HttpProber::new(DEFAULT_MAX_JITTER)?);
    let scheduler_config = SchedulerConfig {
        interval: cfg.cycle_interval,
        concurrency: cfg.concurrency,
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        // The task owns the sender; it must outlive the scheduler or recv() reports Closed.
        let shutdown_tx = shutdown_tx;
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal, finishing current cycle");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    match cfg.webhook_url.clone() {
        Some(url) => {
            tracing::info!("Sending incident notifications to webhook");
            let notifier = Arc::new(WebhookNotifier::new(url)?);
            run(monitors, store, notifier, prober, scheduler_config, shutdown_rx).await
        }
        None => {
            tracing::info!("No webhook configured, incidents are logged only");
            let notifier = Arc::new(LogNotifier);
            run(monitors, store, notifier, prober, scheduler_config, shutdown_rx).await
        }
    }
}

async fn run<N: Notifier>(
    monitors: Vec<monitor::Monitor>,
    store: Arc<Store>,
    notifier: Arc<N>,
    prober: Arc<HttpProber>,
    config: SchedulerConfig,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let scheduler = Scheduler::new(monitors.into(), store, notifier, prober, config);

    // Persistence and notification failures end the process; the supervisor restarts it.
    if let Err(e) = scheduler.run(shutdown).await {
        tracing::error!("Scheduler stopped: {}", e);
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
