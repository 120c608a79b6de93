//! PgCluster reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use crds::{PgCluster, PgClusterStatus, ResourceState};
use kube::Api;
use tracing::{debug, info};

use super::patch_status;
use crate::controller::{ObjectKey, Reconciler};
use crate::error::ReconcileError;

/// Reconciles PgCluster resources.
pub struct PgClusterReconciler {
    api: Api<PgCluster>,
}

impl PgClusterReconciler {
    #[must_use]
    pub fn new(api: Api<PgCluster>) -> Self {
        Self { api }
    }
}

/// Status message describing the requested topology.
fn topology(cluster: &PgCluster) -> String {
    let spec = &cluster.spec;
    format!(
        "primary and {} replica(s) of {} on port {}",
        spec.replicas, spec.image, spec.port
    )
}

/// State and message the status should carry for the current spec.
fn desired_status(key: &ObjectKey, cluster: &PgCluster) -> (ResourceState, String) {
    if cluster.spec.image.trim().is_empty() {
        (ResourceState::Failed, format!("PgCluster {key} has no image"))
    } else {
        (ResourceState::Processed, topology(cluster))
    }
}

/// Whether the recorded status already matches `state` and `message`.
fn is_up_to_date(cluster: &PgCluster, state: ResourceState, message: &str) -> bool {
    cluster
        .status
        .as_ref()
        .is_some_and(|status| status.state == state && status.message.as_deref() == Some(message))
}

#[async_trait]
impl Reconciler<PgCluster> for PgClusterReconciler {
    async fn reconcile(&self, key: &ObjectKey, object: Option<Arc<PgCluster>>) -> Result<(), ReconcileError> {
        let Some(cluster) = object else {
            debug!(key = %key, "PgCluster not in cache, skipping");
            return Ok(());
        };

        let (state, message) = desired_status(key, &cluster);
        // Every status write comes back as a notification; write only changes.
        if is_up_to_date(&cluster, state, &message) {
            debug!(key = %key, state = state.as_str(), "PgCluster status up to date");
            return Ok(());
        }

        let status = PgClusterStatus {
            state,
            message: Some(message.clone()),
            last_reconciled: Some(Utc::now()),
        };
        if state == ResourceState::Failed {
            patch_status(&self.api, &key.name, &status).await?;
            return Err(ReconcileError::Permanent(message));
        }

        info!(
            key = %key,
            replicas = cluster.spec.replicas,
            policies = cluster.spec.policies.len(),
            "Reconciling PgCluster"
        );
        patch_status(&self.api, &key.name, &status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pg_cluster, unreachable_client};

    fn reconciler() -> PgClusterReconciler {
        PgClusterReconciler::new(Api::namespaced(unreachable_client(), "default"))
    }

    #[test]
    fn test_status_tracks_spec_changes() {
        let key = ObjectKey::new("default", "hippo");
        let mut cluster = create_test_pg_cluster("hippo", "default", 2);
        let (state, message) = desired_status(&key, &cluster);
        assert_eq!(state, ResourceState::Processed);
        assert!(!is_up_to_date(&cluster, state, &message));

        cluster.status = Some(PgClusterStatus {
            state,
            message: Some(message.clone()),
            last_reconciled: None,
        });
        assert!(is_up_to_date(&cluster, state, &message));

        // Scaling changes the topology, so the status is stale again
        cluster.spec.replicas = 3;
        let (state, message) = desired_status(&key, &cluster);
        assert!(!is_up_to_date(&cluster, state, &message));
    }

    #[tokio::test]
    async fn test_recorded_failure_is_not_written_again() {
        let key = ObjectKey::new("default", "hippo");
        let mut cluster = create_test_pg_cluster("hippo", "default", 1);
        cluster.spec.image = String::new();

        let (state, message) = desired_status(&key, &cluster);
        assert_eq!(state, ResourceState::Failed);

        // Nothing recorded yet: the failure is written, which needs the API server
        let err = reconciler()
            .reconcile(&key, Some(Arc::new(cluster.clone())))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Kube(_)));

        // Already recorded: no request is made and the key is settled
        cluster.status = Some(PgClusterStatus {
            state,
            message: Some(message),
            last_reconciled: Some(Utc::now()),
        });
        assert!(reconciler().reconcile(&key, Some(Arc::new(cluster))).await.is_ok());
    }

    #[tokio::test]
    async fn test_up_to_date_cluster_is_skipped() {
        let key = ObjectKey::new("default", "hippo");
        let mut cluster = create_test_pg_cluster("hippo", "default", 2);
        cluster.status = Some(PgClusterStatus {
            state: ResourceState::Processed,
            message: Some(topology(&cluster)),
            last_reconciled: None,
        });
        assert!(reconciler().reconcile(&key, Some(Arc::new(cluster))).await.is_ok());
        assert!(reconciler().reconcile(&key, None).await.is_ok());
    }
}
