//! Kubernetes clients handed to each controller group.
//!
//! Every group gets its own client set, so connection pools of different
//! namespaces are independent.

use std::fmt;

use async_trait::async_trait;
use kube::{Client, Config};
use tracing::debug;

use crate::error::ControllerError;

/// Clients for one controller group.
#[derive(Clone)]
pub struct ControllerClients {
    /// Connection configuration the clients were built from
    pub config: Config,
    /// Client for the pgops.io custom resources
    pub pgo_client: Client,
    /// Client for built-in resources (pods, jobs)
    pub kube_client: Client,
}

impl fmt::Debug for ControllerClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerClients")
            .field("cluster_url", &self.config.cluster_url)
            .finish_non_exhaustive()
    }
}

impl ControllerClients {
    /// Builds both clients from `config`.
    pub fn from_config(config: Config) -> Result<Self, ControllerError> {
        let pgo_client = Client::try_from(config.clone())
            .map_err(|e| ControllerError::ClientSetup(format!("custom resource client: {e}")))?;
        let kube_client = Client::try_from(config.clone())
            .map_err(|e| ControllerError::ClientSetup(format!("kube client: {e}")))?;
        Ok(Self {
            config,
            pgo_client,
            kube_client,
        })
    }
}

/// Supplies a fresh client set for every new controller group.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn controller_clients(&self) -> Result<ControllerClients, ControllerError>;
}

/// Infers configuration from the environment: in-cluster service account
/// first, then the local kubeconfig.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeClientProvider;

#[async_trait]
impl ClientProvider for KubeClientProvider {
    async fn controller_clients(&self) -> Result<ControllerClients, ControllerError> {
        let config = Config::infer().await.map_err(|e| {
            ControllerError::ClientSetup(format!("failed to infer Kubernetes configuration: {e}"))
        })?;
        debug!(cluster_url = %config.cluster_url, "Building controller clients");
        ControllerClients::from_config(config)
    }
}
