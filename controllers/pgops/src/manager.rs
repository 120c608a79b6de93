//! Controller manager: the registry of controller groups, one per namespace.
//!
//! Every group's cancellation token is a child of the manager's root token,
//! so stopping the manager stops every group. Operations on a namespace
//! without a group fail with [`ControllerError::NamespaceNotFound`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use workqueue::QueueMetrics;

use crate::clients::ClientProvider;
use crate::config::ControllerSettings;
use crate::error::ControllerError;
use crate::group::{ControllerGroup, GroupStatus};

struct ManagerState {
    root: CancellationToken,
    groups: HashMap<String, Arc<ControllerGroup>>,
}

/// Registry mapping namespace to controller group.
pub struct ControllerManager {
    state: Mutex<ManagerState>,
    clients: Arc<dyn ClientProvider>,
    settings: ControllerSettings,
    metrics: Option<QueueMetrics>,
}

impl std::fmt::Debug for ControllerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ControllerManager {
    /// Creates a manager with a group for each of `namespaces`.
    ///
    /// Fails with the first group construction error; no manager is returned then.
    pub async fn new<I, S>(
        namespaces: I,
        clients: Arc<dyn ClientProvider>,
        settings: ControllerSettings,
        metrics: Option<QueueMetrics>,
    ) -> Result<Self, ControllerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let manager = Self {
            state: Mutex::new(ManagerState {
                root: CancellationToken::new(),
                groups: HashMap::new(),
            }),
            clients,
            settings,
            metrics,
        };

        for ns in namespaces {
            if let Err(e) = manager.add_controller_group(ns.as_ref()).await {
                error!(namespace = ns.as_ref(), error = %e, "Failed to create controller group");
                return Err(e);
            }
        }

        let namespaces = manager.namespaces().await;
        debug!(namespaces = ?namespaces, "Controller manager created");
        Ok(manager)
    }

    /// Adds a group for `namespace`. Does nothing if one already exists.
    pub async fn add_controller_group(&self, namespace: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock().await;
        if state.groups.contains_key(namespace) {
            debug!(namespace, "Controller group already exists");
            return Ok(());
        }

        let clients = self.clients.controller_clients().await?;
        let group = ControllerGroup::new(
            namespace,
            &state.root,
            &clients,
            &self.settings,
            self.metrics.as_ref(),
        );
        state.groups.insert(namespace.to_string(), Arc::new(group));

        info!(namespace, "Added controller group");
        Ok(())
    }

    /// Adds a group for `namespace` and runs it.
    ///
    /// Not atomic: a `remove_group` for the same namespace between the two
    /// steps makes the run fail with `NamespaceNotFound`.
    pub async fn add_and_run_controller_group(&self, namespace: &str) -> Result<(), ControllerError> {
        self.add_controller_group(namespace).await?;
        self.run_group(namespace).await
    }

    async fn group(&self, namespace: &str) -> Result<Arc<ControllerGroup>, ControllerError> {
        self.state
            .lock()
            .await
            .groups
            .get(namespace)
            .cloned()
            .ok_or_else(|| ControllerError::NamespaceNotFound(namespace.to_string()))
    }

    async fn all_groups(&self) -> Vec<Arc<ControllerGroup>> {
        self.state.lock().await.groups.values().cloned().collect()
    }

    /// Runs the group for `namespace`.
    pub async fn run_group(&self, namespace: &str) -> Result<(), ControllerError> {
        self.group(namespace).await?.run()
    }

    /// Runs every registered group. Groups that cannot run are logged and skipped.
    pub async fn run_all(&self) {
        for group in self.all_groups().await {
            if let Err(e) = group.run() {
                warn!(namespace = group.namespace(), error = %e, "Could not run controller group");
            }
        }
        debug!("All controller groups are now running");
    }

    /// Stops the group for `namespace` without waiting for its workers.
    pub async fn stop_group(&self, namespace: &str) -> Result<(), ControllerError> {
        self.group(namespace).await?.stop();
        Ok(())
    }

    /// Stops every group by cancelling the root token.
    pub async fn stop_all(&self) {
        self.state.lock().await.root.cancel();
        info!("All controller groups are now stopped");
    }

    /// Stops the group for `namespace`, removes it from the registry and
    /// waits (bounded by the shutdown timeout) for its workers to exit.
    pub async fn remove_group(&self, namespace: &str) -> Result<(), ControllerError> {
        let group = {
            let mut state = self.state.lock().await;
            let group = state
                .groups
                .remove(namespace)
                .ok_or_else(|| ControllerError::NamespaceNotFound(namespace.to_string()))?;
            group.stop();
            group
        };

        group.shutdown(self.settings.shutdown_timeout).await;
        info!(namespace, "Removed controller group");
        Ok(())
    }

    /// Stops and removes every group, then waits for them to drain.
    ///
    /// A fresh root token is installed, so groups added afterwards run normally.
    pub async fn remove_all(&self) {
        let groups: Vec<Arc<ControllerGroup>> = {
            let mut state = self.state.lock().await;
            state.root.cancel();
            state.root = CancellationToken::new();
            state.groups.drain().map(|(_, group)| group).collect()
        };

        let timeout = self.settings.shutdown_timeout;
        join_all(groups.iter().map(|group| group.shutdown(timeout))).await;
        info!(removed = groups.len(), "All controller groups have been removed");
    }

    /// Registered namespaces, sorted.
    pub async fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.state.lock().await.groups.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    pub async fn contains(&self, namespace: &str) -> bool {
        self.state.lock().await.groups.contains_key(namespace)
    }

    pub async fn group_status(&self, namespace: &str) -> Result<GroupStatus, ControllerError> {
        Ok(self.group(namespace).await?.status())
    }

    /// Status of every group, sorted by namespace.
    pub async fn group_statuses(&self) -> Vec<GroupStatus> {
        let mut statuses: Vec<GroupStatus> = self
            .all_groups()
            .await
            .iter()
            .map(|group| group.status())
            .collect();
        statuses.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingClientProvider, FailingClientProvider, wait_until};
    use std::time::Duration;

    fn settings() -> ControllerSettings {
        ControllerSettings {
            shutdown_timeout: Duration::from_secs(5),
            ..ControllerSettings::default()
        }
    }

    async fn manager(namespaces: &[&str]) -> (ControllerManager, Arc<CountingClientProvider>) {
        let provider = Arc::new(CountingClientProvider::default());
        let manager = ControllerManager::new(
            namespaces.iter().copied(),
            Arc::clone(&provider) as Arc<dyn ClientProvider>,
            settings(),
            None,
        )
        .await
        .unwrap();
        (manager, provider)
    }

    #[tokio::test]
    async fn test_new_registers_every_namespace() {
        let (manager, provider) = manager(&["b", "a"]).await;
        assert_eq!(manager.namespaces().await, vec!["a", "b"]);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_new_fails_on_client_setup_error() {
        let result = ControllerManager::new(
            ["a"],
            Arc::new(FailingClientProvider) as Arc<dyn ClientProvider>,
            settings(),
            None,
        )
        .await;
        assert!(matches!(result, Err(ControllerError::ClientSetup(_))));
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let (manager, provider) = manager(&["a"]).await;
        manager.run_group("a").await.unwrap();
        let before = manager.group_status("a").await.unwrap();

        manager.add_controller_group("a").await.unwrap();

        assert_eq!(provider.calls(), 1, "second add must not build clients");
        assert_eq!(manager.group_status("a").await.unwrap(), before);
        manager.remove_all().await;
    }

    #[tokio::test]
    async fn test_run_group_twice_keeps_worker_count() {
        let (manager, _) = manager(&["a"]).await;
        manager.run_group("a").await.unwrap();
        manager.run_group("a").await.unwrap();

        assert_eq!(manager.group_status("a").await.unwrap().running_workers, 3);
        manager.remove_all().await;
    }

    #[tokio::test]
    async fn test_missing_namespace_is_reported() {
        let (manager, _) = manager(&[]).await;
        for result in [
            manager.run_group("ghost").await,
            manager.stop_group("ghost").await,
            manager.remove_group("ghost").await,
        ] {
            assert!(matches!(result, Err(ControllerError::NamespaceNotFound(ns)) if ns == "ghost"));
        }
        assert!(manager.group_status("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_two_namespace_lifecycle() {
        let (manager, _) = manager(&["a", "b"]).await;
        manager.run_all().await;

        for status in manager.group_statuses().await {
            assert!(status.started);
            assert_eq!(status.queued_controllers, 3);
            assert_eq!(status.handler_controllers, 3);
            assert_eq!(status.running_workers, 3);
        }

        manager.stop_group("a").await.unwrap();
        let a = manager.group_status("a").await.unwrap();
        let b = manager.group_status("b").await.unwrap();
        assert!(a.stopped);
        assert!(!b.stopped);

        let group_a = manager.group("a").await.unwrap();
        wait_until(|| group_a.running_workers() == 0).await;
        assert_eq!(manager.group_status("b").await.unwrap().running_workers, 3);

        manager.remove_group("a").await.unwrap();
        assert!(!manager.contains("a").await);
        assert!(matches!(
            manager.run_group("a").await,
            Err(ControllerError::NamespaceNotFound(_))
        ));
        assert!(manager.group_status("b").await.unwrap().started);

        manager.remove_all().await;
    }

    #[tokio::test]
    async fn test_stop_all_then_remove_all_empties_registry() {
        let (manager, _) = manager(&["a", "b"]).await;
        manager.run_all().await;

        manager.stop_all().await;
        for status in manager.group_statuses().await {
            assert!(status.stopped);
        }

        manager.remove_all().await;
        assert!(manager.namespaces().await.is_empty());
        for ns in ["a", "b"] {
            assert!(matches!(
                manager.run_group(ns).await,
                Err(ControllerError::NamespaceNotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_manager_is_reusable_after_remove_all() {
        let (manager, _) = manager(&["a"]).await;
        manager.remove_all().await;

        manager.add_and_run_controller_group("a").await.unwrap();
        let status = manager.group_status("a").await.unwrap();
        assert!(status.started);
        assert!(!status.stopped);

        manager.remove_all().await;
    }

    #[tokio::test]
    async fn test_stopped_group_reports_group_stopped() {
        let (manager, _) = manager(&["a"]).await;
        manager.stop_group("a").await.unwrap();

        assert!(matches!(
            manager.run_group("a").await,
            Err(ControllerError::GroupStopped(_))
        ));

        // Removing and adding again gives a runnable group
        manager.remove_group("a").await.unwrap();
        manager.add_and_run_controller_group("a").await.unwrap();
        assert!(manager.group_status("a").await.unwrap().started);
        manager.remove_all().await;
    }
}
