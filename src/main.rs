// swarm-autoscaler: main entry point

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use swarm_autoscaler::actions::{ScaleQueue, ScaleWorker, QUEUE_CAPACITY};
use swarm_autoscaler::discovery::NodeDiscovery;
use swarm_autoscaler::events::{EventStore, EventWriter, SHUTDOWN_GRACE};
use swarm_autoscaler::lock::SingletonLock;
use swarm_autoscaler::scaler::AutoscalerLoop;
use swarm_autoscaler::server::{self, AppState};
use swarm_autoscaler::settings::Settings;
use swarm_autoscaler::swarm::{LocalStatsProvider, SwarmClient, SwarmOrchestrator};
use swarm_autoscaler::watcher::EventWatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let settings = Settings::from_env();
    info!(
        interval = ?settings.check_interval,
        dns_name = %settings.discovery_dns_name,
        dry_run = settings.dry_run,
        "Starting swarm autoscaler"
    );

    let (events, events_rx) = EventStore::open(&settings.events_db_path, settings.events_max_rows)
        .context("failed to open the audit event store")?;
    let swarm = Arc::new(
        SwarmClient::connect()
            .await
            .context("failed to connect to the local docker daemon")?,
    );
    let discovery = Arc::new(NodeDiscovery::new(
        settings.discovery_dns_name.clone(),
        settings.listen_port(),
        settings.discovery_workers,
        settings.check_interval,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = EventWriter::new(Arc::clone(&events), events_rx, shutdown_rx.clone());
    let writer_handle = tokio::spawn(writer.run());

    let watcher = EventWatcher::new(
        Arc::clone(&swarm),
        |event| debug!(service = %event.service, kind = ?event.kind, "Service event"),
        shutdown_rx.clone(),
    );
    tokio::spawn(watcher.run());

    let settings = Arc::new(settings);

    // Only the lock holder runs the decision loop; other processes on the
    // node keep serving stats queries.
    let lock = SingletonLock::acquire(&settings.lock_file)
        .context("failed to initialize the singleton lock")?;
    if lock.is_some() {
        let (queue, actions_rx) = ScaleQueue::new(QUEUE_CAPACITY, settings.scale_cooldown);
        let orchestrator: Arc<dyn SwarmOrchestrator> = swarm.clone();

        let worker = ScaleWorker::new(
            Arc::clone(&orchestrator),
            Arc::clone(&events),
            Arc::clone(&queue),
            actions_rx,
            Arc::clone(&settings),
            shutdown_rx.clone(),
        );
        tokio::spawn(worker.run());

        let control = AutoscalerLoop::new(
            orchestrator,
            discovery,
            queue,
            Arc::clone(&settings),
            shutdown_rx.clone(),
        );
        tokio::spawn(control.run());
        info!("Autoscaler started (singleton lock acquired)");
    } else {
        info!("Autoscaler not started (lock held by another process)");
    }

    let stats: Arc<dyn LocalStatsProvider> = swarm;
    let app = server::router(Arc::new(AppState {
        stats,
        events: Arc::clone(&events),
    }));
    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    info!(addr = %settings.listen_addr, "HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("HTTP server error")?;

    // Give the audit writer its grace window to drain.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer_handle).await;
    drop(lock);
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
}
