//! Per-kind controllers of a controller group.
//!
//! Queue-bearing:
//! - `pgtask`: PgTask status bookkeeping
//! - `pgcluster`: PgCluster status bookkeeping
//! - `pgreplica`: PgReplica status bookkeeping, waits for its cluster
//!
//! Handler-only:
//! - `pgpolicy`: marks new PgPolicy objects as processed
//! - `pod`: logs readiness changes of database pods
//! - `job`: logs completion and failure of operator jobs

mod job;
mod pg_cluster;
mod pg_policy;
mod pg_replica;
mod pg_task;
mod pod;

use std::fmt::Debug;
use std::sync::Arc;

use crds::{PgCluster, PgPolicy, PgReplica, PgTask};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use workqueue::{QueueMetrics, WorkQueue, default_controller_rate_limiter};

use crate::clients::ControllerClients;
use crate::config::ControllerSettings;
use crate::controller::{HandlerController, ObjectKey, QueuedController, ResourceController};
use crate::error::{ExtKubeApiError, ReconcileError};
use crate::informer::InformerFactory;

pub use job::JobHandler;
pub use pg_cluster::PgClusterReconciler;
pub use pg_policy::PgPolicyHandler;
pub use pg_replica::PgReplicaReconciler;
pub use pg_task::PgTaskReconciler;
pub use pod::PodHandler;

/// Everything a per-kind controller is built from.
#[derive(Debug)]
pub struct ControllerContext<'a> {
    pub namespace: &'a str,
    pub clients: &'a ControllerClients,
    pub pgo_informer_factory: &'a InformerFactory,
    pub kube_informer_factory: &'a InformerFactory,
    pub settings: &'a ControllerSettings,
    pub metrics: Option<&'a QueueMetrics>,
}

impl ControllerContext<'_> {
    fn queue(&self, controller: &str) -> WorkQueue<ObjectKey> {
        WorkQueue::with_metrics(
            format!("{}/{}", self.namespace, controller),
            default_controller_rate_limiter(),
            self.metrics.cloned(),
        )
    }

    fn pgo_api<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
    {
        Api::namespaced(self.clients.pgo_client.clone(), self.namespace)
    }
}

/// Builds the six controllers of a group, queue-bearing ones first.
pub fn build_controllers(ctx: &ControllerContext<'_>) -> Vec<Arc<dyn ResourceController>> {
    let max_retries = ctx.settings.max_retries;

    let pg_task: Arc<dyn ResourceController> = Arc::new(QueuedController::new(
        "pgtask",
        ctx.pgo_informer_factory.informer::<PgTask>(),
        ctx.queue("pgtask"),
        Arc::new(PgTaskReconciler::new(ctx.pgo_api())),
        max_retries,
    ));

    let pg_cluster: Arc<dyn ResourceController> = Arc::new(QueuedController::new(
        "pgcluster",
        ctx.pgo_informer_factory.informer::<PgCluster>(),
        ctx.queue("pgcluster"),
        Arc::new(PgClusterReconciler::new(ctx.pgo_api())),
        max_retries,
    ));

    let pg_replica: Arc<dyn ResourceController> = Arc::new(QueuedController::new(
        "pgreplica",
        ctx.pgo_informer_factory.informer::<PgReplica>(),
        ctx.queue("pgreplica"),
        Arc::new(PgReplicaReconciler::new(
            ctx.pgo_api(),
            ctx.pgo_informer_factory.informer::<PgCluster>(),
        )),
        max_retries,
    ));

    let pg_policy: Arc<dyn ResourceController> = Arc::new(HandlerController::new(
        "pgpolicy",
        ctx.pgo_informer_factory.informer::<PgPolicy>(),
        Arc::new(PgPolicyHandler::new(ctx.pgo_api())),
    ));

    let pod: Arc<dyn ResourceController> = Arc::new(HandlerController::new(
        "pod",
        ctx.kube_informer_factory.informer::<Pod>(),
        Arc::new(PodHandler),
    ));

    let job: Arc<dyn ResourceController> = Arc::new(HandlerController::new(
        "job",
        ctx.kube_informer_factory.informer::<Job>(),
        Arc::new(JobHandler),
    ));

    vec![pg_task, pg_cluster, pg_replica, pg_policy, pod, job]
}

/// Merge-patches the status subresource of `name`. A missing object is not
/// an error: it was deleted after the key was queued.
async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<(), ReconcileError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    let patch = serde_json::json!({ "status": serde_json::to_value(status)? });
    match api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(name, "Object disappeared before its status could be updated");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Value of the label `key` on `obj`, if set.
fn label<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}
