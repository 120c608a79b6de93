//! Pod handler: logs readiness transitions of database pods.

use std::sync::Arc;

use async_trait::async_trait;
use crds::{CLUSTER_LABEL, ROLE_LABEL};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use super::label;
use crate::informer::ResourceEventHandler;

/// Reacts to notifications for pods carrying the cluster label.
#[derive(Debug, Default, Clone, Copy)]
pub struct PodHandler;

/// Whether the pod reports the `Ready` condition as true.
fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|condition| condition.status == "True")
}

#[async_trait]
impl ResourceEventHandler<Pod> for PodHandler {
    async fn on_add(&self, obj: &Arc<Pod>) {
        if let Some(cluster) = label(&**obj, CLUSTER_LABEL) {
            debug!(pod = ?obj.metadata.name, cluster, "Database pod added");
        }
    }

    async fn on_update(&self, old: &Arc<Pod>, new: &Arc<Pod>) {
        let Some(cluster) = label(&**new, CLUSTER_LABEL) else {
            return;
        };
        let (was_ready, ready) = (is_ready(old), is_ready(new));
        if was_ready != ready {
            info!(
                pod = ?new.metadata.name,
                cluster,
                role = label(&**new, ROLE_LABEL).unwrap_or("unknown"),
                ready,
                "Database pod readiness changed"
            );
        }
    }

    async fn on_delete(&self, obj: &Arc<Pod>) {
        if let Some(cluster) = label(&**obj, CLUSTER_LABEL) {
            info!(pod = ?obj.metadata.name, cluster, "Database pod deleted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pod;

    #[test]
    fn test_readiness_from_conditions() {
        assert!(is_ready(&create_test_pod("hippo-0", "default", Some("hippo"), true)));
        assert!(!is_ready(&create_test_pod("hippo-0", "default", Some("hippo"), false)));
        assert!(!is_ready(&Pod::default()));
    }

    #[test]
    fn test_cluster_label_lookup() {
        let pod = create_test_pod("hippo-0", "default", Some("hippo"), true);
        assert_eq!(label(&pod, CLUSTER_LABEL), Some("hippo"));

        let pod = create_test_pod("web-0", "default", None, true);
        assert_eq!(label(&pod, CLUSTER_LABEL), None);
    }
}
