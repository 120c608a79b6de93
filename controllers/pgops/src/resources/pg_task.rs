//! PgTask reconciler.
//!
//! Accepts pending tasks and records the outcome in the task status. The
//! task itself (backup, restore, ...) is carried out by the job it spawns.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use crds::{PgTask, PgTaskStatus, ResourceState};
use kube::Api;
use tracing::{debug, info};

use super::patch_status;
use crate::controller::{ObjectKey, Reconciler};
use crate::error::ReconcileError;

/// Reconciles PgTask resources.
pub struct PgTaskReconciler {
    api: Api<PgTask>,
}

impl PgTaskReconciler {
    #[must_use]
    pub fn new(api: Api<PgTask>) -> Self {
        Self { api }
    }
}

/// A task is handled once, after which its status is no longer `Pending`.
fn is_finished(task: &PgTask) -> bool {
    task.status
        .as_ref()
        .is_some_and(|status| status.state != ResourceState::Pending)
}

#[async_trait]
impl Reconciler<PgTask> for PgTaskReconciler {
    async fn reconcile(&self, key: &ObjectKey, object: Option<Arc<PgTask>>) -> Result<(), ReconcileError> {
        let Some(task) = object else {
            debug!(key = %key, "PgTask not in cache, skipping");
            return Ok(());
        };
        if is_finished(&task) {
            debug!(key = %key, "PgTask already handled");
            return Ok(());
        }

        let cluster = task.spec.cluster_name.trim();
        if cluster.is_empty() {
            let message = format!("PgTask {key} does not name a cluster");
            let status = PgTaskStatus {
                state: ResourceState::Failed,
                message: Some(message.clone()),
                completed_at: Some(Utc::now()),
            };
            patch_status(&self.api, &key.name, &status).await?;
            return Err(ReconcileError::Permanent(message));
        }

        info!(
            key = %key,
            task_type = task.spec.task_type.as_str(),
            cluster,
            "Accepting PgTask"
        );
        let status = PgTaskStatus {
            state: ResourceState::Processed,
            message: Some(format!(
                "{} task accepted for cluster {}",
                task.spec.task_type.as_str(),
                cluster
            )),
            completed_at: Some(Utc::now()),
        };
        patch_status(&self.api, &key.name, &status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pg_task, unreachable_client};

    #[test]
    fn test_is_finished() {
        let mut task = create_test_pg_task("backup-1", "default", "hippo");
        assert!(!is_finished(&task));

        task.status = Some(PgTaskStatus::default());
        assert!(!is_finished(&task));

        task.status = Some(PgTaskStatus {
            state: ResourceState::Processed,
            ..PgTaskStatus::default()
        });
        assert!(is_finished(&task));
    }

    #[tokio::test]
    async fn test_missing_and_finished_tasks_are_skipped() {
        let reconciler = PgTaskReconciler::new(Api::namespaced(unreachable_client(), "default"));
        let key = ObjectKey::new("default", "backup-1");

        assert!(reconciler.reconcile(&key, None).await.is_ok());

        let mut task = create_test_pg_task("backup-1", "default", "hippo");
        task.status = Some(PgTaskStatus {
            state: ResourceState::Failed,
            ..PgTaskStatus::default()
        });
        assert!(reconciler.reconcile(&key, Some(Arc::new(task))).await.is_ok());
    }
}
