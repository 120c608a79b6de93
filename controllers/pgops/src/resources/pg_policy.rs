//! PgPolicy handler.
//!
//! Handled inline: a new policy is validated and its status set once. There
//! is no retry; a failed status update is picked up again on the next
//! notification for the object.

use std::sync::Arc;

use async_trait::async_trait;
use crds::{PgPolicy, PgPolicyStatus, ResourceState};
use kube::Api;
use tracing::{debug, info, warn};

use super::patch_status;
use crate::controller::ObjectKey;
use crate::informer::ResourceEventHandler;

/// Reacts to PgPolicy notifications.
pub struct PgPolicyHandler {
    api: Api<PgPolicy>,
}

impl PgPolicyHandler {
    #[must_use]
    pub fn new(api: Api<PgPolicy>) -> Self {
        Self { api }
    }

    async fn process(&self, policy: &PgPolicy) {
        let Some(key) = ObjectKey::from_resource(policy) else {
            return;
        };
        if !is_pending(policy) {
            return;
        }

        let status = policy_status(policy);
        info!(key = %key, state = status.state.as_str(), "Processing PgPolicy");
        if let Err(e) = patch_status(&self.api, &key.name, &status).await {
            warn!(key = %key, error = %e, "Failed to update PgPolicy status");
        }
    }
}

fn is_pending(policy: &PgPolicy) -> bool {
    policy
        .status
        .as_ref()
        .is_none_or(|status| status.state == ResourceState::Pending)
}

/// Status for a policy: it must carry SQL inline or point to it.
fn policy_status(policy: &PgPolicy) -> PgPolicyStatus {
    let has_sql = policy.spec.sql.as_deref().is_some_and(|sql| !sql.trim().is_empty());
    let has_url = policy.spec.url.as_deref().is_some_and(|url| !url.trim().is_empty());
    if has_sql || has_url {
        PgPolicyStatus {
            state: ResourceState::Processed,
            message: None,
        }
    } else {
        PgPolicyStatus {
            state: ResourceState::Failed,
            message: Some("policy has neither sql nor url".to_string()),
        }
    }
}

#[async_trait]
impl ResourceEventHandler<PgPolicy> for PgPolicyHandler {
    async fn on_add(&self, obj: &Arc<PgPolicy>) {
        self.process(obj).await;
    }

    async fn on_update(&self, _old: &Arc<PgPolicy>, new: &Arc<PgPolicy>) {
        self.process(new).await;
    }

    async fn on_delete(&self, obj: &Arc<PgPolicy>) {
        debug!(name = ?obj.metadata.name, "PgPolicy deleted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pg_policy;

    #[test]
    fn test_policy_needs_sql_or_url() {
        let policy = create_test_pg_policy("audit", "default", Some("CREATE EXTENSION pgaudit;"), None);
        assert_eq!(policy_status(&policy).state, ResourceState::Processed);

        let policy = create_test_pg_policy("remote", "default", None, Some("https://example.com/p.sql"));
        assert_eq!(policy_status(&policy).state, ResourceState::Processed);

        let policy = create_test_pg_policy("empty", "default", Some("  "), None);
        let status = policy_status(&policy);
        assert_eq!(status.state, ResourceState::Failed);
        assert!(status.message.is_some());
    }

    #[test]
    fn test_only_pending_policies_are_processed() {
        let mut policy = create_test_pg_policy("audit", "default", Some("SELECT 1;"), None);
        assert!(is_pending(&policy));

        policy.status = Some(PgPolicyStatus {
            state: ResourceState::Processed,
            message: None,
        });
        assert!(!is_pending(&policy));
    }
}
