//! PgReplica reconciler.
//!
//! A replica is only accepted once its cluster is present in the shared
//! PgCluster cache; until then the key is retried with backoff.

use std::sync::Arc;

use async_trait::async_trait;
use crds::{PgCluster, PgReplica, PgReplicaStatus, ResourceState};
use kube::Api;
use tracing::{debug, info};

use super::patch_status;
use crate::controller::{ObjectKey, Reconciler};
use crate::error::ReconcileError;
use crate::informer::Informer;

/// Reconciles PgReplica resources.
pub struct PgReplicaReconciler {
    api: Api<PgReplica>,
    clusters: Arc<Informer<PgCluster>>,
}

impl PgReplicaReconciler {
    #[must_use]
    pub fn new(api: Api<PgReplica>, clusters: Arc<Informer<PgCluster>>) -> Self {
        Self { api, clusters }
    }
}

#[async_trait]
impl Reconciler<PgReplica> for PgReplicaReconciler {
    async fn reconcile(&self, key: &ObjectKey, object: Option<Arc<PgReplica>>) -> Result<(), ReconcileError> {
        let Some(replica) = object else {
            debug!(key = %key, "PgReplica not in cache, skipping");
            return Ok(());
        };
        if replica
            .status
            .as_ref()
            .is_some_and(|status| status.state == ResourceState::Processed)
        {
            return Ok(());
        }

        let cluster_name = &replica.spec.cluster_name;
        if self.clusters.get(&key.namespace, cluster_name).is_none() {
            return Err(ReconcileError::Transient(format!(
                "PgCluster {}/{} not found for replica {}",
                key.namespace, cluster_name, key.name
            )));
        }

        info!(key = %key, cluster = %cluster_name, "Accepting PgReplica");
        let status = PgReplicaStatus {
            state: ResourceState::Processed,
            message: Some(format!("replica of {cluster_name}")),
        };
        patch_status(&self.api, &key.name, &status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pg_replica, unreachable_client};
    use std::time::Duration;

    #[tokio::test]
    async fn test_replica_waits_for_its_cluster() {
        let client = unreachable_client();
        let clusters = Arc::new(Informer::new(
            Api::<PgCluster>::namespaced(client.clone(), "default"),
            Duration::ZERO,
        ));
        let reconciler = PgReplicaReconciler::new(Api::namespaced(client, "default"), clusters);

        let key = ObjectKey::new("default", "hippo-r1");
        let replica = Arc::new(create_test_pg_replica("hippo-r1", "default", "hippo"));

        let err = reconciler.reconcile(&key, Some(replica)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("default/hippo"));

        assert!(reconciler.reconcile(&key, None).await.is_ok());
    }
}
