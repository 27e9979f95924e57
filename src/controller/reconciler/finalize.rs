//! # Policy Deletion
//!
//! Retires a policy whose definition was deleted: detach every target, delete
//! the policy, and confirm the name no longer resolves.

use crate::controller::reconciler::diff::AttachmentPlan;
use crate::controller::reconciler::types::{PolicyAction, ReconcileReport};
use crate::controller::reconciler::Reconciler;
use crate::controller::retry::classify_delete;
use crate::model::{Lookup, TargetSet};
use crate::observability::metrics;
use crate::provider::{ControlPlaneError, ControlPlaneErrorKind};
use tracing::{debug, error, info, info_span, warn, Instrument};

impl Reconciler {
    /// Look up the policy's attached targets, then run
    /// [`Reconciler::delete_policy_lifecycle`] with them
    ///
    /// When the attachments cannot be listed the deletion is skipped: the
    /// control plane refuses to delete a policy that is still attached.
    pub async fn retire_policy(&self, policy_name: &str) -> ReconcileReport {
        let known_targets = match self.resolver.resolve_id(policy_name).await {
            Lookup::Found(policy_id) => self.resolver.list_attached_targets(&policy_id).await,
            Lookup::NotFound => Lookup::Found(TargetSet::new()),
            Lookup::Unavailable => Lookup::Unavailable,
        };

        match known_targets {
            Lookup::Found(targets) => self.delete_policy_lifecycle(policy_name, &targets).await,
            Lookup::NotFound => {
                self.delete_policy_lifecycle(policy_name, &TargetSet::new())
                    .await
            }
            Lookup::Unavailable => {
                warn!(
                    policy.name = %policy_name,
                    "Attached targets unknown, skipping policy deletion"
                );
                metrics::increment_degraded_operations("delete", 1);
                ReconcileReport {
                    policy_action: PolicyAction::Degraded,
                    degraded: 1,
                    ..ReconcileReport::new(policy_name)
                }
            }
        }
    }

    /// Detach `known_attached_targets` and delete the policy
    ///
    /// 1. Resolve the policy id (no policy: already done)
    /// 2. Detach each known target independently
    /// 3. Delete; an attempt only succeeds once the name no longer resolves
    pub async fn delete_policy_lifecycle(
        &self,
        policy_name: &str,
        known_attached_targets: &TargetSet,
    ) -> ReconcileReport {
        let span = info_span!(
            "delete_policy_lifecycle",
            policy.name = %policy_name,
            targets = known_attached_targets.len()
        );
        async move {
            let mut report = ReconcileReport::new(policy_name);

            let policy_id = match self.resolver.resolve_id(policy_name).await {
                Lookup::Found(policy_id) => policy_id,
                Lookup::NotFound => {
                    info!("Policy does not exist, nothing to delete");
                    report.policy_action = PolicyAction::AlreadyAbsent;
                    return report;
                }
                Lookup::Unavailable => {
                    warn!("Policy id unknown, skipping deletion");
                    report.policy_action = PolicyAction::Degraded;
                    report.degraded += 1;
                    metrics::increment_degraded_operations("delete", 1);
                    return report;
                }
            };

            let plan = AttachmentPlan::detach_all(known_attached_targets);
            self.apply_plan(&policy_id, &plan, &mut report).await;

            info!(policy.id = %policy_id, "Deleting policy");
            let id = policy_id.as_str();
            let outcome = self
                .executor
                .run("DeletePolicy", classify_delete, move || {
                    self.delete_and_confirm(policy_name, id)
                })
                .await;

            if outcome.is_success() {
                info!(policy.id = %policy_id, "Policy deleted");
                report.policy_action = PolicyAction::Deleted(policy_id);
            } else {
                error!(policy.id = %policy_id, "Policy deletion abandoned");
                report.policy_action = PolicyAction::Degraded;
                report.degraded += 1;
                metrics::increment_degraded_operations("delete", 1);
            }
            report
        }
        .instrument(span)
        .await
    }

    /// One delete attempt: issue the delete, then confirm the name is gone
    async fn delete_and_confirm(
        &self,
        policy_name: &str,
        policy_id: &str,
    ) -> Result<(), ControlPlaneError> {
        match self.control_plane.delete_policy(policy_id).await {
            Ok(()) => {}
            Err(e) if e.kind == ControlPlaneErrorKind::PolicyNotFound => {
                debug!(policy.id = %policy_id, "Policy already deleted, confirming");
            }
            Err(e) => return Err(e),
        }

        match self.resolver.find_policy_once(policy_name).await? {
            None => Ok(()),
            Some(remaining) => Err(ControlPlaneError::new(
                ControlPlaneErrorKind::Transient,
                "DeletePolicy",
                format!("policy {remaining} is still listed after delete"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::provider::memory::{InMemoryControlPlane, InMemoryObjectStore};
    use crate::provider::{ControlPlane, ObjectStore};
    use std::sync::Arc;

    fn reconciler(control_plane: &Arc<InMemoryControlPlane>) -> Reconciler {
        let config = ControllerConfig {
            sleep_time_seconds: 0,
            ..ControllerConfig::default()
        };
        Reconciler::new(
            Arc::clone(control_plane) as Arc<dyn ControlPlane>,
            Arc::new(InMemoryObjectStore::new()) as Arc<dyn ObjectStore>,
            Arc::new(config),
        )
    }

    fn targets(ids: &[&str]) -> TargetSet {
        ids.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_detaches_then_deletes() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let policy_id = control_plane.seed_policy("region1", "{}");
        control_plane.seed_attachment(&policy_id, "A");
        control_plane.seed_attachment(&policy_id, "B");

        let report = reconciler(&control_plane)
            .delete_policy_lifecycle("region1", &targets(&["A", "B"]))
            .await;

        assert_eq!(report.policy_action, PolicyAction::Deleted(policy_id));
        assert_eq!(report.detached, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(control_plane.policy_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_policy_is_done() {
        let control_plane = Arc::new(InMemoryControlPlane::new());

        let report = reconciler(&control_plane)
            .delete_policy_lifecycle("region1", &targets(&["A"]))
            .await;

        assert_eq!(report.policy_action, PolicyAction::AlreadyAbsent);
        assert!(control_plane.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_target_keeps_policy_in_use() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let policy_id = control_plane.seed_policy("region1", "{}");
        control_plane.seed_attachment(&policy_id, "A");
        control_plane.seed_attachment(&policy_id, "Z");

        let report = reconciler(&control_plane)
            .delete_policy_lifecycle("region1", &targets(&["A"]))
            .await;

        assert_eq!(report.policy_action, PolicyAction::Degraded);
        assert_eq!(control_plane.policy_count(), 1);
        assert_eq!(control_plane.calls_named("DeletePolicy"), 3);
    }

    #[tokio::test]
    async fn test_retire_policy_discovers_targets() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let policy_id = control_plane.seed_policy("region1", "{}");
        control_plane.seed_attachment(&policy_id, "ou-a");

        let report = reconciler(&control_plane).retire_policy("region1").await;

        assert_eq!(report.policy_action, PolicyAction::Deleted(policy_id));
        assert_eq!(report.detached, vec!["ou-a".to_string()]);
    }

    #[tokio::test]
    async fn test_retire_policy_keeps_policy_when_targets_unlisted() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let policy_id = control_plane.seed_policy("region1", "{}");
        control_plane.seed_attachment(&policy_id, "ou-a");
        control_plane.fail_next("ListTargetsForPolicy", ControlPlaneErrorKind::Throttled, 3);

        let report = reconciler(&control_plane).retire_policy("region1").await;

        assert_eq!(report.policy_action, PolicyAction::Degraded);
        assert_eq!(report.degraded, 1);
        assert_eq!(control_plane.policy_count(), 1);
        assert_eq!(control_plane.calls_named("DeletePolicy"), 0);
        assert_eq!(control_plane.calls_named("DetachPolicy"), 0);
    }
}
