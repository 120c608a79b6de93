//! PgOps Controller Manager
//!
//! Runs the PgOps PostgreSQL operator's controllers scoped per namespace:
//! - [`manager::ControllerManager`]: registry of controller groups keyed by namespace
//! - [`group::ControllerGroup`]: the informers, queues and workers of one namespace
//! - [`informer`]: shared watch-backed caches delivering add/update/delete notifications
//! - [`controller`]: the watch, queue and worker pattern every controller follows
//! - [`resources`]: the PgTask, PgCluster, PgReplica, PgPolicy, Pod and Job controllers
//!
//! Each group's cancellation token is a child of the manager's root token, so
//! a single namespace can be stopped and removed without touching the others.

pub mod clients;
pub mod config;
pub mod controller;
pub mod error;
pub mod group;
pub mod informer;
pub mod manager;
pub mod probes;
pub mod resources;

#[cfg(test)]
mod test_utils;

pub use clients::{ClientProvider, ControllerClients, KubeClientProvider};
pub use config::{ControllerSettings, OperatorConfig};
pub use error::{ControllerError, ReconcileError};
pub use group::{ControllerGroup, GroupStatus};
pub use manager::ControllerManager;
