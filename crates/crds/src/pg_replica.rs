//! PgReplica CRD
//!
//! Requests an additional replica for an existing PgCluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::ResourceState;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pgops.io",
    version = "v1",
    kind = "PgReplica",
    namespaced,
    status = "PgReplicaStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PgReplicaSpec {
    /// Name of the PgCluster this replica belongs to
    pub cluster_name: String,

    /// Storage size override for this replica
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PgReplicaStatus {
    /// Processing state
    #[serde(default)]
    pub state: ResourceState,

    /// Human readable detail about the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
