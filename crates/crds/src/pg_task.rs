//! PgTask CRD
//!
//! A one-shot operation against a PgCluster (backup, restore, failover, ...).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::ResourceState;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pgops.io",
    version = "v1",
    kind = "PgTask",
    namespaced,
    status = "PgTaskStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PgTaskSpec {
    /// Name of the PgCluster the task runs against
    pub cluster_name: String,

    /// Kind of operation
    pub task_type: TaskType,

    /// Free-form parameters interpreted by the task implementation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Take a backup
    Backup,

    /// Restore from a backup
    Restore,

    /// Promote a replica
    Failover,

    /// Remove the cluster and its data
    Delete,
}

impl TaskType {
    /// Returns the serialized form of the task type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Backup => "backup",
            TaskType::Restore => "restore",
            TaskType::Failover => "failover",
            TaskType::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PgTaskStatus {
    /// Processing state
    #[serde(default)]
    pub state: ResourceState,

    /// Human readable detail about the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Completion timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}
