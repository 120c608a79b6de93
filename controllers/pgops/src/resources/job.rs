//! Job handler: logs completion and failure of operator jobs.

use std::sync::Arc;

use async_trait::async_trait;
use crds::{CLUSTER_LABEL, TASK_LABEL};
use k8s_openapi::api::batch::v1::Job;
use tracing::{debug, info, warn};

use super::label;
use crate::informer::ResourceEventHandler;

/// Reacts to notifications for jobs started by the operator.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobHandler;

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed,
}

fn outcome(job: &Job) -> Option<JobOutcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .filter(|condition| condition.status == "True")
        .find_map(|condition| match condition.type_.as_str() {
            "Complete" => Some(JobOutcome::Succeeded),
            "Failed" => Some(JobOutcome::Failed),
            _ => None,
        })
}

fn is_operator_job(job: &Job) -> bool {
    label(job, CLUSTER_LABEL).is_some() || label(job, TASK_LABEL).is_some()
}

#[async_trait]
impl ResourceEventHandler<Job> for JobHandler {
    async fn on_add(&self, obj: &Arc<Job>) {
        if is_operator_job(obj) {
            debug!(job = ?obj.metadata.name, outcome = ?outcome(obj), "Operator job added");
        }
    }

    async fn on_update(&self, old: &Arc<Job>, new: &Arc<Job>) {
        if !is_operator_job(new) {
            return;
        }
        let current = outcome(new);
        if outcome(old) == current {
            return;
        }
        let task = label(&**new, TASK_LABEL).unwrap_or("");
        match current {
            Some(JobOutcome::Succeeded) => info!(job = ?new.metadata.name, task, "Operator job completed"),
            Some(JobOutcome::Failed) => warn!(job = ?new.metadata.name, task, "Operator job failed"),
            None => {}
        }
    }

    async fn on_delete(&self, obj: &Arc<Job>) {
        if is_operator_job(obj) {
            debug!(job = ?obj.metadata.name, "Operator job deleted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_job;

    #[test]
    fn test_outcome_from_conditions() {
        assert_eq!(outcome(&create_test_job("backup-1", "default", None)), None);
        assert_eq!(
            outcome(&create_test_job("backup-1", "default", Some("Complete"))),
            Some(JobOutcome::Succeeded)
        );
        assert_eq!(
            outcome(&create_test_job("backup-1", "default", Some("Failed"))),
            Some(JobOutcome::Failed)
        );
    }

    #[test]
    fn test_operator_jobs_are_labelled() {
        assert!(is_operator_job(&create_test_job("backup-1", "default", None)));
        assert!(!is_operator_job(&Job::default()));
    }
}
