//! PgCluster CRD
//!
//! Declares a PostgreSQL cluster: a primary plus a number of replicas.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::ResourceState;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pgops.io",
    version = "v1",
    kind = "PgCluster",
    namespaced,
    status = "PgClusterStatus",
    shortname = "pgc"
)]
#[serde(rename_all = "camelCase")]
pub struct PgClusterSpec {
    /// Container image used for every database instance
    pub image: String,

    /// Number of replicas next to the primary
    #[serde(default)]
    pub replicas: u32,

    /// PostgreSQL port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Storage size for each instance (e.g. "10Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,

    /// Names of PgPolicy objects applied once the cluster is up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
}

fn default_port() -> u16 {
    5432
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PgClusterStatus {
    /// Processing state
    #[serde(default)]
    pub state: ResourceState,

    /// Human readable detail about the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_cluster_spec_defaults() {
        let spec: PgClusterSpec =
            serde_json::from_value(serde_json::json!({ "image": "postgres:16" }))
                .expect("valid spec");
        assert_eq!(spec.port, 5432);
        assert_eq!(spec.replicas, 0);
        assert!(spec.policies.is_empty());
    }
}
