//! PgPolicy CRD
//!
//! SQL applied to clusters that reference the policy.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::ResourceState;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pgops.io",
    version = "v1",
    kind = "PgPolicy",
    namespaced,
    status = "PgPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PgPolicySpec {
    /// Inline SQL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    /// URL to fetch the SQL from (used when `sql` is empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PgPolicyStatus {
    /// Processing state
    #[serde(default)]
    pub state: ResourceState,

    /// Human readable detail about the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
