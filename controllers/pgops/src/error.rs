//! Controller-specific error types.
//!
//! `ControllerError` covers manager, group and process-level failures.
//! `ReconcileError` is returned by reconcilers and decides whether a key is
//! retried through the work queue or dropped.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the PgOps controller manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Building the Kubernetes clients for a group failed
    #[error("Client setup failed: {0}")]
    ClientSetup(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No controller group is registered for the namespace
    #[error("No controller group registered for namespace {0}")]
    NamespaceNotFound(String),

    /// The group was stopped and has to be removed and added again before it can run
    #[error("Controller group for namespace {0} has been stopped")]
    GroupStopped(String),

    /// Registering metrics failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server failed
    #[error("Probe server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Errors returned by a single reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure that retrying cannot fix
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Failure expected to clear up on its own
    #[error("Transient error: {0}")]
    Transient(String),
}

impl ReconcileError {
    /// Whether the key should be re-queued with backoff.
    ///
    /// Kubernetes errors are retried unless the API server rejected the
    /// request with a client error other than conflict or throttling.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Kube(e) => match e.status_code() {
                Some(code) => !(400..500).contains(&code) || code == 409 || code == 429,
                None => true,
            },
            ReconcileError::Transient(_) => true,
            ReconcileError::Permanent(_) | ReconcileError::Serialization(_) => false,
        }
    }
}

/// Status code helpers for `kube::Error`.
pub trait ExtKubeApiError {
    /// HTTP status code if the error came from the API server.
    fn status_code(&self) -> Option<u16>;

    /// 404 Not Found or 410 Gone
    fn is_not_found(&self) -> bool {
        matches!(self.status_code(), Some(404 | 410))
    }
}

impl ExtKubeApiError for KubeError {
    fn status_code(&self) -> Option<u16> {
        match self {
            KubeError::Api(response) => Some(response.code),
            _ => None,
        }
    }
}
