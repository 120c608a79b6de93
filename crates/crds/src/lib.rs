//! PgOps CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the PgOps operator.
//!
//! All kinds live in the `pgops.io/v1` API group and are namespaced; the
//! operator runs one controller group per watched namespace.

pub mod common;
pub mod pg_cluster;
pub mod pg_policy;
pub mod pg_replica;
pub mod pg_task;

pub use common::*;
pub use pg_cluster::*;
pub use pg_policy::*;
pub use pg_replica::*;
pub use pg_task::*;

/// API group shared by every PgOps custom resource.
pub const API_GROUP: &str = "pgops.io";
