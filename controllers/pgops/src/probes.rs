//! Probe server for Kubernetes and Prometheus.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if the server is running)
//! - `/readyz` - Readiness probe (200 while at least one controller group runs)
//! - `/metrics` - Prometheus metrics endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ControllerError;
use crate::manager::ControllerManager;

/// Shared state for the probe server
#[derive(Debug, Clone)]
pub struct ProbeState {
    pub manager: Arc<ControllerManager>,
    pub registry: Registry,
}

impl ProbeState {
    #[must_use]
    pub fn new(manager: Arc<ControllerManager>, registry: Registry) -> Self {
        Self { manager, registry }
    }

    /// Whether any controller group is started and not stopped.
    pub async fn is_ready(&self) -> bool {
        self.manager
            .group_statuses()
            .await
            .iter()
            .any(|status| status.started && !status.stopped)
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable while no group is running.
async fn readyz(State(state): State<ProbeState>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics(State(state): State<ProbeState>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "# Error encoding metrics").into_response();
    }
    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Create the probe server router
pub fn create_router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serves the probe endpoints on `addr` until `token` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: ProbeState,
    token: CancellationToken,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Starting probe server");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    info!("Probe server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerSettings;
    use crate::test_utils::CountingClientProvider;
    use axum::body::to_bytes;
    use workqueue::QueueMetrics;

    async fn state(namespaces: &[&str]) -> ProbeState {
        let registry = Registry::new();
        let metrics = QueueMetrics::new(&registry).unwrap();
        let manager = ControllerManager::new(
            namespaces.iter().copied(),
            Arc::new(CountingClientProvider::default()),
            ControllerSettings::default(),
            Some(metrics),
        )
        .await
        .unwrap();
        ProbeState::new(Arc::new(manager), registry)
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_follows_running_groups() {
        let state = state(&["tenant-a"]).await;
        assert_eq!(readyz(State(state.clone())).await.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.manager.run_all().await;
        assert_eq!(readyz(State(state.clone())).await.status(), StatusCode::OK);

        state.manager.stop_all().await;
        assert_eq!(readyz(State(state.clone())).await.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.manager.remove_all().await;
    }

    #[tokio::test]
    async fn test_metrics_exposes_queue_metrics() {
        let state = state(&["tenant-a"]).await;
        state.manager.run_all().await;

        let response = metrics(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("workqueue_depth"));
        assert!(text.contains("tenant-a/pgtask"));

        state.manager.remove_all().await;
    }
}
