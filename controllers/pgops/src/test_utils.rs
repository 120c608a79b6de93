//! Test utilities for unit testing controllers
//!
//! This module provides helpers for creating test data and for running
//! groups and managers without a Kubernetes API server: clients point at an
//! unreachable local endpoint, so informers stay in their retry loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crds::{
    CLUSTER_LABEL, PgCluster, PgClusterSpec, PgPolicy, PgPolicySpec, PgReplica, PgReplicaSpec,
    PgTask, PgTaskSpec, TASK_LABEL, TaskType,
};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Client, Config};

use crate::clients::{ClientProvider, ControllerClients};
use crate::error::ControllerError;

/// Address nothing listens on
const UNREACHABLE_URL: &str = "http://127.0.0.1:9";

fn unreachable_config() -> Config {
    Config::new(UNREACHABLE_URL.parse().unwrap())
}

/// Client whose requests fail with a connection error. Needs a Tokio runtime.
pub fn unreachable_client() -> Client {
    Client::try_from(unreachable_config()).unwrap()
}

/// Client set built on [`unreachable_client`].
pub fn test_clients() -> ControllerClients {
    ControllerClients::from_config(unreachable_config()).unwrap()
}

/// Client provider counting how often clients were requested
#[derive(Debug, Default)]
pub struct CountingClientProvider {
    calls: AtomicUsize,
}

impl CountingClientProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientProvider for CountingClientProvider {
    async fn controller_clients(&self) -> Result<ControllerClients, ControllerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ControllerClients::from_config(unreachable_config())
    }
}

/// Client provider that always fails
#[derive(Debug, Default)]
pub struct FailingClientProvider;

#[async_trait]
impl ClientProvider for FailingClientProvider {
    async fn controller_clients(&self) -> Result<ControllerClients, ControllerError> {
        Err(ControllerError::ClientSetup("no credentials".to_string()))
    }
}

/// Polls `condition` every 10ms for up to 5s
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

fn meta(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: (!labels.is_empty()).then_some(labels),
        ..Default::default()
    }
}

fn cluster_labels(cluster: Option<&str>) -> BTreeMap<String, String> {
    cluster
        .map(|cluster| BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster.to_string())]))
        .unwrap_or_default()
}

/// Helper to create test PgCluster CRD
pub fn create_test_pg_cluster(name: &str, namespace: &str, replicas: u32) -> PgCluster {
    let mut cluster = PgCluster::new(
        name,
        PgClusterSpec {
            image: "postgres:16".to_string(),
            replicas,
            port: 5432,
            storage: Some("10Gi".to_string()),
            policies: Vec::new(),
        },
    );
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster
}

/// Helper to create test PgTask CRD
pub fn create_test_pg_task(name: &str, namespace: &str, cluster: &str) -> PgTask {
    PgTask {
        metadata: meta(name, namespace, cluster_labels(Some(cluster))),
        spec: PgTaskSpec {
            cluster_name: cluster.to_string(),
            task_type: TaskType::Backup,
            parameters: BTreeMap::new(),
        },
        status: None,
    }
}

/// Helper to create test PgReplica CRD
pub fn create_test_pg_replica(name: &str, namespace: &str, cluster: &str) -> PgReplica {
    PgReplica {
        metadata: meta(name, namespace, cluster_labels(Some(cluster))),
        spec: PgReplicaSpec {
            cluster_name: cluster.to_string(),
            storage: None,
        },
        status: None,
    }
}

/// Helper to create test PgPolicy CRD
pub fn create_test_pg_policy(
    name: &str,
    namespace: &str,
    sql: Option<&str>,
    url: Option<&str>,
) -> PgPolicy {
    PgPolicy {
        metadata: meta(name, namespace, BTreeMap::new()),
        spec: PgPolicySpec {
            sql: sql.map(str::to_string),
            url: url.map(str::to_string),
        },
        status: None,
    }
}

/// Helper to create a test Pod, optionally labelled with its cluster
pub fn create_test_pod(name: &str, namespace: &str, cluster: Option<&str>, ready: bool) -> Pod {
    Pod {
        metadata: meta(name, namespace, cluster_labels(cluster)),
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to create a test Job labelled with a task, with an optional true condition
pub fn create_test_job(name: &str, namespace: &str, condition: Option<&str>) -> Job {
    let labels = BTreeMap::from([(TASK_LABEL.to_string(), name.to_string())]);
    Job {
        metadata: meta(name, namespace, labels),
        status: Some(JobStatus {
            conditions: condition.map(|type_| {
                vec![JobCondition {
                    type_: type_.to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
