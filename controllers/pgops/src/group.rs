//! Controller group: every controller for one namespace.
//!
//! A group owns two shared informer factories (pgops.io custom resources and
//! built-in resources), the controllers built on them and a cancellation
//! token derived from the manager's root token. Running the group starts the
//! factories and one worker loop per worker slot of every queue-bearing
//! controller.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use workqueue::QueueMetrics;

use crate::clients::ControllerClients;
use crate::config::ControllerSettings;
use crate::controller::{ControllerKind, ResourceController, WorkerRunner};
use crate::error::ControllerError;
use crate::informer::InformerFactory;
use crate::resources::{self, ControllerContext};

/// Minimum delay between two runs of a worker loop.
const WORKER_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct GroupState {
    started: bool,
}

/// Snapshot of a group's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub namespace: String,
    pub started: bool,
    pub stopped: bool,
    pub queued_controllers: usize,
    pub handler_controllers: usize,
    pub running_workers: usize,
}

/// The reconciliation engine for one namespace.
pub struct ControllerGroup {
    namespace: String,
    token: CancellationToken,
    state: Mutex<GroupState>,
    pgo_informer_factory: InformerFactory,
    kube_informer_factory: InformerFactory,
    controllers: Vec<Arc<dyn ResourceController>>,
    controllers_with_workers: Vec<Arc<dyn WorkerRunner>>,
    workers_per_controller: usize,
    workers: TaskTracker,
    background: TaskTracker,
}

impl std::fmt::Debug for ControllerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerGroup")
            .field("namespace", &self.namespace)
            .field("controllers", &self.controllers.len())
            .field("controllers_with_workers", &self.controllers_with_workers.len())
            .field("stopped", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ControllerGroup {
    /// Builds every controller for `namespace` and registers their handlers.
    ///
    /// The group's token is a child of `parent`.
    pub fn new(
        namespace: impl Into<String>,
        parent: &CancellationToken,
        clients: &ControllerClients,
        settings: &ControllerSettings,
        metrics: Option<&QueueMetrics>,
    ) -> Self {
        let namespace = namespace.into();

        let pgo_informer_factory = InformerFactory::new(
            clients.pgo_client.clone(),
            namespace.clone(),
            settings.resync_interval,
        );
        let kube_informer_factory = InformerFactory::new(
            clients.kube_client.clone(),
            namespace.clone(),
            settings.resync_interval,
        );

        let controllers = resources::build_controllers(&ControllerContext {
            namespace: &namespace,
            clients,
            pgo_informer_factory: &pgo_informer_factory,
            kube_informer_factory: &kube_informer_factory,
            settings,
            metrics,
        });

        for controller in &controllers {
            controller.add_event_handler();
        }

        // Remember the controllers owning a queue so their workers can be
        // started alongside the informers.
        let controllers_with_workers: Vec<Arc<dyn WorkerRunner>> = controllers
            .iter()
            .filter_map(|controller| Arc::clone(controller).worker_runner())
            .collect();

        debug!(
            namespace = %namespace,
            controllers = controllers.len(),
            with_workers = controllers_with_workers.len(),
            "Built controller group"
        );

        Self {
            namespace,
            token: parent.child_token(),
            state: Mutex::new(GroupState::default()),
            pgo_informer_factory,
            kube_informer_factory,
            controllers,
            controllers_with_workers,
            workers_per_controller: settings.workers_per_controller.max(1),
            workers: TaskTracker::new(),
            background: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Starts the informers and worker loops.
    ///
    /// Returns immediately without waiting for caches to sync. Running a
    /// started group again is a no-op; running a stopped group fails.
    pub fn run(&self) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.started {
            debug!(namespace = %self.namespace, "Controller group already running");
            return Ok(());
        }
        if self.token.is_cancelled() {
            return Err(ControllerError::GroupStopped(self.namespace.clone()));
        }

        self.kube_informer_factory.start(&self.token, &self.background);
        self.pgo_informer_factory.start(&self.token, &self.background);

        for runner in &self.controllers_with_workers {
            for _ in 0..self.workers_per_controller {
                self.workers
                    .spawn(until(self.token.clone(), WORKER_PERIOD, Arc::clone(runner)));
            }
        }

        // Cancellation shuts the queues down so workers drain and exit.
        let token = self.token.clone();
        let runners = self.controllers_with_workers.clone();
        self.background.spawn(async move {
            token.cancelled().await;
            for runner in runners {
                runner.shut_down_queue();
            }
        });

        state.started = true;
        info!(
            namespace = %self.namespace,
            workers = self.workers.len(),
            "Controller group is now running"
        );
        Ok(())
    }

    /// Cancels the group's token. Does not wait for workers to exit.
    pub fn stop(&self) {
        self.token.cancel();
        info!(namespace = %self.namespace, "Controller group has been stopped");
    }

    /// Stops the group and waits up to `timeout` for workers and informers
    /// to exit, then drops the group's queue metrics. Returns `false` on timeout.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.stop();
        self.workers.close();
        self.background.close();

        let drained = tokio::time::timeout(timeout, async {
            self.workers.wait().await;
            self.background.wait().await;
        })
        .await
        .is_ok();

        for runner in &self.controllers_with_workers {
            runner.remove_queue_metrics();
        }

        if !drained {
            warn!(
                namespace = %self.namespace,
                running_workers = self.workers.len(),
                "Timed out waiting for controller group to drain"
            );
        }
        drained
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).started
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of worker loops currently alive.
    #[must_use]
    pub fn running_workers(&self) -> usize {
        self.workers.len()
    }

    /// Whether every started informer has synced.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.pgo_informer_factory.has_synced() && self.kube_informer_factory.has_synced()
    }

    /// Waits until both factories' caches are synced, or the group stops.
    pub async fn wait_for_cache_sync(&self) -> bool {
        self.kube_informer_factory.wait_for_cache_sync(&self.token).await
            && self.pgo_informer_factory.wait_for_cache_sync(&self.token).await
    }

    #[must_use]
    pub fn status(&self) -> GroupStatus {
        let queued = self
            .controllers
            .iter()
            .filter(|controller| controller.kind() == ControllerKind::Queued)
            .count();
        GroupStatus {
            namespace: self.namespace.clone(),
            started: self.is_started(),
            stopped: self.is_stopped(),
            queued_controllers: queued,
            handler_controllers: self.controllers.len() - queued,
            running_workers: self.running_workers(),
        }
    }
}

/// Runs `runner.run_worker()` again and again, `period` apart, until `token`
/// is cancelled.
async fn until(token: CancellationToken, period: Duration, runner: Arc<dyn WorkerRunner>) {
    while !token.is_cancelled() {
        runner.run_worker().await;
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }
    }
    debug!(controller = runner.name(), "Worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_clients, wait_until};

    fn group(parent: &CancellationToken, workers_per_controller: usize) -> ControllerGroup {
        let settings = ControllerSettings {
            workers_per_controller,
            ..ControllerSettings::default()
        };
        ControllerGroup::new("tenant-a", parent, &test_clients(), &settings, None)
    }

    #[tokio::test]
    async fn test_only_queued_controllers_get_workers() {
        let root = CancellationToken::new();
        let group = group(&root, 1);

        let status = group.status();
        assert_eq!(status.queued_controllers, 3);
        assert_eq!(status.handler_controllers, 3);
        assert!(!status.started);
        assert_eq!(status.running_workers, 0);

        group.run().unwrap();
        assert!(group.is_started());
        assert_eq!(group.running_workers(), 3);

        assert!(group.shutdown(Duration::from_secs(5)).await);
        assert_eq!(group.running_workers(), 0);
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let root = CancellationToken::new();
        let group = group(&root, 2);

        group.run().unwrap();
        group.run().unwrap();
        assert_eq!(group.running_workers(), 6);

        assert!(group.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_informers_are_shared_per_kind() {
        let root = CancellationToken::new();
        let group = group(&root, 1);

        // PgCluster is watched by its own controller and read by the replica
        // reconciler, yet only four custom resource informers exist.
        assert_eq!(group.pgo_informer_factory.informer_count(), 4);
        assert_eq!(group.kube_informer_factory.informer_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_is_signal_only_and_workers_drain() {
        let root = CancellationToken::new();
        let group = group(&root, 1);
        group.run().unwrap();

        group.stop();
        assert!(group.is_stopped());
        assert!(!root.is_cancelled());

        wait_until(|| group.running_workers() == 0).await;
        assert!(matches!(group.run(), Ok(())), "a started group stays idempotent");
    }

    #[tokio::test]
    async fn test_stopped_group_cannot_be_started() {
        let root = CancellationToken::new();
        let group = group(&root, 1);
        root.cancel();

        assert!(group.is_stopped());
        assert!(matches!(
            group.run(),
            Err(ControllerError::GroupStopped(ns)) if ns == "tenant-a"
        ));
        assert_eq!(group.running_workers(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_removes_queue_metrics() {
        let registry = prometheus::Registry::new();
        let metrics = QueueMetrics::new(&registry).unwrap();
        let root = CancellationToken::new();
        let group = ControllerGroup::new(
            "tenant-a",
            &root,
            &test_clients(),
            &ControllerSettings::default(),
            Some(&metrics),
        );
        let encode = || {
            prometheus::TextEncoder::new()
                .encode_to_string(&registry.gather())
                .unwrap()
        };
        assert!(encode().contains("tenant-a/pgtask"));

        group.run().unwrap();
        assert!(group.shutdown(Duration::from_secs(5)).await);
        assert!(!encode().contains("tenant-a/"));
    }

    #[tokio::test]
    async fn test_cache_sync_wait_ends_when_stopped() {
        let root = CancellationToken::new();
        let group = group(&root, 1);
        group.run().unwrap();
        assert!(!group.has_synced());

        group.stop();
        assert!(!group.wait_for_cache_sync().await);
        assert!(group.shutdown(Duration::from_secs(5)).await);
    }
}
