//! hotplug controller
//!
//! Owns the global CPU core pool shared by hotplug agents. It serves the
//! HTTP API, admits core requests, and drives the reconciliation loop that
//! retries queued requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hotplug_controller::{
    agent_client::HttpAgentClient,
    api, config,
    event_log::{EventSink, JsonlEventSink, MultiSink, TracingEventSink},
    scheduler::{spawn_scheduler, ReconcileWorker},
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to HOTPLUG_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hotplug controller");
    info!(
        listen_addr = %config.listen_addr,
        reconcile_interval_ms = config.reconcile_interval.as_millis() as u64,
        agent_timeout_ms = config.scheduler.agent_timeout.as_millis() as u64,
        min_cores_per_job = config.scheduler.policy.min_cores_per_job,
        reserve_cores = config.scheduler.policy.reserve_cores,
        "Configuration loaded"
    );

    let client = Arc::new(HttpAgentClient::new(config.scheduler.agent_timeout)?);

    let mut sinks = MultiSink::new().with(Arc::new(TracingEventSink));
    let file_sink = match &config.event_log {
        Some(path) => match JsonlEventSink::open(path).await {
            Ok(sink) => {
                info!(path = %path, "Event log opened");
                let sink = Arc::new(sink);
                sinks = sinks.with(sink.clone());
                Some(sink)
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to open event log");
                return Err(e.into());
            }
        },
        None => {
            info!("Event log file disabled");
            None
        }
    };
    let sink: Arc<dyn EventSink> = Arc::new(sinks);

    let (scheduler, scheduler_ref) = spawn_scheduler(config.scheduler.clone(), client, sink);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = ReconcileWorker::new(scheduler.clone(), config.reconcile_interval);
    let worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(AppState::new(scheduler));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if tokio::time::timeout(shutdown_timeout, worker_handle).await.is_err() {
        warn!("Reconcile worker did not shut down in time");
    }

    scheduler_ref.stop();
    if tokio::time::timeout(shutdown_timeout, scheduler_ref.join()).await.is_err() {
        warn!("Scheduler did not shut down in time");
    }

    if let Some(sink) = file_sink {
        match Arc::try_unwrap(sink) {
            Ok(sink) => sink.close().await,
            Err(_) => warn!("Event log still in use; relying on per-line flush"),
        }
    }

    info!("Controller shutdown complete");
    Ok(())
}
