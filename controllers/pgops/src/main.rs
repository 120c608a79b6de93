//! PgOps Controller
//!
//! Runs one controller group per watched namespace for the PgOps custom
//! resources (PgCluster, PgReplica, PgTask, PgPolicy) and the pods and jobs
//! the operator creates, alongside a probe and metrics server.

use std::sync::Arc;

use pgops_controller::probes::{self, ProbeState};
use pgops_controller::{ControllerError, ControllerManager, KubeClientProvider, OperatorConfig};
use prometheus::Registry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use workqueue::QueueMetrics;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting PgOps Controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespaces: {}", config.namespaces.join(", "));
    info!("  Workers per controller: {}", config.workers_per_controller);
    info!("  Max retries: {}", config.max_retries);
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Probe address: {}", config.probe_addr);

    let registry = Registry::new();
    let metrics = QueueMetrics::new(&registry)?;

    let manager = Arc::new(
        ControllerManager::new(
            &config.namespaces,
            Arc::new(KubeClientProvider),
            config.controller_settings(),
            Some(metrics),
        )
        .await?,
    );
    manager.run_all().await;

    let probe_token = CancellationToken::new();
    let probe_server = tokio::spawn(probes::serve(
        config.probe_addr,
        ProbeState::new(Arc::clone(&manager), registry),
        probe_token.clone(),
    ));

    shutdown_signal().await?;
    info!("Received shutdown signal, stopping controller groups");

    manager.stop_all().await;
    manager.remove_all().await;

    probe_token.cancel();
    match probe_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Probe server failed"),
        Err(e) => error!(error = %e, "Probe server task panicked"),
    }

    info!("PgOps Controller stopped");
    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<(), ControllerError> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}
