//! Headless alert host for stdin/stdout JSON communication.
//!
//! Restores persisted alerts, runs the timer loop, and serves
//! `CommandEnvelope` messages as newline-delimited JSON from stdin.
//! Responses and `alert.expired` events are written to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use fae_alerts::config::AlertsConfig;
use fae_alerts::host::handler::{ManagerCommandHandler, broadcast_expired};
use fae_alerts::host::stdio::run_stdio_bridge;
use fae_alerts::manager::AlertManager;
use fae_alerts::scheduling::TokioScheduler;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Event broadcast capacity for `alert.expired` envelopes.
const EVENT_CAPACITY: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(AlertsConfig::default_config_path);
    let config = AlertsConfig::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", config_path.display()))?;

    // Stdout is reserved for the JSON protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .init();

    tracing::info!(config = %config_path.display(), "fae-alerts-host starting");

    let (fire_tx, fire_rx) = mpsc::unbounded_channel();
    // Subscribed before load so events raised during startup reach the bridge.
    let (event_tx, event_rx) = broadcast::channel(EVENT_CAPACITY);
    let scheduler = Arc::new(TokioScheduler::new(fire_tx)?);

    let manager = Arc::new(
        AlertManager::new(scheduler, broadcast_expired(event_tx))
            .with_store(config.store.open())
            .with_write_through(config.store.write_through),
    );

    let report = manager.load()?;
    for dropped in &report.dropped {
        tracing::warn!(alert_id = %dropped.id, reason = %dropped.reason, "persisted alert not restored");
    }
    let fire_loop = manager.spawn_fire_loop(fire_rx);

    let handler = ManagerCommandHandler::new(Arc::clone(&manager), config.alerts.clone());
    let bridge_result = run_stdio_bridge(handler, event_rx).await;

    manager.shutdown()?;
    fire_loop.abort();

    bridge_result.map_err(|e| {
        tracing::error!(error = %e, "fae-alerts-host exited with error");
        anyhow::anyhow!("fae-alerts-host failed: {e}")
    })?;

    tracing::info!("fae-alerts-host shut down cleanly");
    Ok(())
}
