//! Prints the PgOps CustomResourceDefinitions as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use crds::{PgCluster, PgPolicy, PgReplica, PgTask};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        PgCluster::crd(),
        PgReplica::crd(),
        PgTask::crd(),
        PgPolicy::crd(),
    ];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
