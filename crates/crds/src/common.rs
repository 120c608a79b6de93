//! Types shared by all PgOps CRDs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carried by every object (pods, jobs, replicas, tasks) that belongs
/// to a database cluster. The value is the `PgCluster` name.
pub const CLUSTER_LABEL: &str = "pgops.io/cluster";

/// Label identifying the role of a database pod (`primary` or `replica`).
pub const ROLE_LABEL: &str = "pgops.io/role";

/// Label set on jobs started for a `PgTask`. The value is the task name.
pub const TASK_LABEL: &str = "pgops.io/task";

/// Processing state recorded by the operator in a resource status.
///
/// Serializes as PascalCase ("Processed", "Failed", etc.) but deserializes
/// both PascalCase and lowercase for objects written by older tooling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ResourceState {
    /// Seen but not yet handled by the operator
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Handled by the operator
    #[serde(alias = "processed")]
    Processed,

    /// Handling failed permanently
    #[serde(alias = "failed")]
    Failed,
}

impl ResourceState {
    /// Returns the serialized form of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Pending => "Pending",
            ResourceState::Processed => "Processed",
            ResourceState::Failed => "Failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_state_accepts_lowercase() {
        let state: ResourceState = serde_json::from_str("\"processed\"").expect("valid state");
        assert_eq!(state, ResourceState::Processed);
        let state: ResourceState = serde_json::from_str("\"Failed\"").expect("valid state");
        assert_eq!(state, ResourceState::Failed);
    }

    #[test]
    fn test_resource_state_serializes_pascal_case() {
        let json = serde_json::to_string(&ResourceState::Processed).expect("serializable");
        assert_eq!(json, "\"Processed\"");
        assert_eq!(ResourceState::Processed.as_str(), "Processed");
    }
}
