//! # Attachments
//!
//! Attaches a policy to its declared targets and detaches it from the rest.

use crate::controller::reconciler::diff::AttachmentPlan;
use crate::controller::reconciler::types::{ReconcileReport, ReconcilerError};
use crate::controller::reconciler::Reconciler;
use crate::controller::retry::{classify_attach, classify_detach};
use crate::model::{Lookup, ProcessingMode};
use crate::observability::metrics;
use tracing::{debug, info, info_span, warn, Instrument};

impl Reconciler {
    /// Converge the policy's attachments onto its declared target list
    ///
    /// 1. Resolve the policy id (no policy: nothing to do)
    /// 2. Read the declared targets (absent: none declared)
    /// 3. List attached targets (unknown: none attached)
    /// 4. Attach declared - attached, then detach attached - declared
    ///
    /// Each target is attempted independently; one abandoned target never
    /// blocks the others.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcilerError`] when the target list exists but cannot be read.
    pub async fn reconcile_attachments(
        &self,
        bucket: &str,
        policy_name: &str,
        mode: ProcessingMode,
    ) -> Result<ReconcileReport, ReconcilerError> {
        let span = info_span!(
            "reconcile_attachments",
            policy.name = %policy_name,
            mode = mode.as_str()
        );
        async move {
            let mut report = ReconcileReport::new(policy_name);

            let policy_id = match self.resolver.resolve_id(policy_name).await {
                Lookup::Found(policy_id) => policy_id,
                Lookup::NotFound => {
                    info!("Policy does not exist, no attachments to reconcile");
                    return Ok(report);
                }
                Lookup::Unavailable => {
                    warn!("Policy id unknown, skipping attachment reconciliation");
                    report.degraded += 1;
                    metrics::increment_degraded_operations("attachments", 1);
                    return Ok(report);
                }
            };

            let declared = self
                .reader
                .read_target_list(bucket, policy_name, mode)
                .await?
                .map(|list| list.to_set())
                .unwrap_or_default();

            let attached = match self.resolver.list_attached_targets(&policy_id).await {
                Lookup::Found(targets) => targets,
                other => {
                    warn!(lookup = %other, "Attached targets unknown, treating as none attached");
                    Default::default()
                }
            };

            let plan = AttachmentPlan::compute(&declared, &attached);
            report.already_converged = plan.unchanged;
            info!(
                policy.id = %policy_id,
                declared = declared.len(),
                attached = attached.len(),
                to_attach = plan.to_attach.len(),
                to_detach = plan.to_detach.len(),
                "Attachment plan computed"
            );

            self.apply_plan(&policy_id, &plan, &mut report).await;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Run every attach, then every detach, recording each result
    pub(crate) async fn apply_plan(
        &self,
        policy_id: &str,
        plan: &AttachmentPlan,
        report: &mut ReconcileReport,
    ) {
        if plan.is_converged() {
            debug!(policy.id = %policy_id, "Attachments already converged");
            return;
        }

        for target_id in &plan.to_attach {
            let target = target_id.as_str();
            info!(policy.id = %policy_id, target.id = %target, "Attaching policy");
            let outcome = self
                .executor
                .run("AttachPolicy", classify_attach, move || {
                    self.control_plane.attach_policy(policy_id, target)
                })
                .instrument(info_span!("attach_policy", target.id = %target))
                .await;

            if outcome.is_success() {
                report.attached.push(target_id.clone());
            } else {
                warn!(target.id = %target, "Attach abandoned, continuing with remaining targets");
                report.degraded += 1;
                metrics::increment_degraded_operations("attach", 1);
            }
        }

        for target_id in &plan.to_detach {
            let target = target_id.as_str();
            info!(policy.id = %policy_id, target.id = %target, "Detaching policy");
            let outcome = self
                .executor
                .run("DetachPolicy", classify_detach, move || {
                    self.control_plane.detach_policy(policy_id, target)
                })
                .instrument(info_span!("detach_policy", target.id = %target))
                .await;

            if outcome.is_success() {
                report.detached.push(target_id.clone());
            } else {
                warn!(target.id = %target, "Detach abandoned, continuing with remaining targets");
                report.degraded += 1;
                metrics::increment_degraded_operations("detach", 1);
            }
        }
    }
}
