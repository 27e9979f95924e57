//! # Policy Object
//!
//! Creates or updates the control-plane policy from its definition document.

use crate::controller::reconciler::types::{PolicyAction, ReconcileReport, ReconcilerError};
use crate::controller::reconciler::Reconciler;
use crate::controller::retry::{classify_create, classify_default, RetryOutcome};
use crate::model::{Lookup, PolicyDocument, ProcessingMode};
use crate::observability::metrics;
use crate::provider::PolicyContent;
use tracing::{info, info_span, warn, Instrument};

impl Reconciler {
    /// Create or update the policy named `policy_name`, then reconcile its
    /// attachments
    ///
    /// Content is submitted in full on every run; there is no content diffing.
    /// When the definition is missing the object step is skipped but
    /// attachments are still reconciled.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcilerError`] when a declared document cannot be read.
    pub async fn reconcile_policy_object(
        &self,
        bucket: &str,
        policy_name: &str,
    ) -> Result<ReconcileReport, ReconcilerError> {
        let span = info_span!(
            "reconcile_policy_object",
            policy.name = %policy_name,
            bucket = %bucket
        );
        async move {
            let mut report = ReconcileReport::new(policy_name);

            report.policy_action = match self.reader.read_definition(bucket, policy_name).await? {
                Some(document) => self.apply_definition(policy_name, &document).await,
                None => {
                    info!(
                        key = %self.config.definition_key(policy_name),
                        "No policy definition found, skipping policy object step"
                    );
                    PolicyAction::DefinitionMissing
                }
            };
            if report.policy_action == PolicyAction::Degraded {
                report.degraded += 1;
                metrics::increment_degraded_operations("policy_object", 1);
            }

            let attachments = self
                .reconcile_attachments(bucket, policy_name, ProcessingMode::Create)
                .await?;
            report.absorb(attachments);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn apply_definition(&self, policy_name: &str, document: &PolicyDocument) -> PolicyAction {
        let content = PolicyContent {
            name: policy_name.to_string(),
            description: self.config.policy_description.clone(),
            content: document.content(),
        };

        match self.resolver.resolve_id(policy_name).await {
            Lookup::Found(policy_id) => self.update_policy(&policy_id, &content).await,
            Lookup::NotFound => self.create_policy(&content).await,
            Lookup::Unavailable => {
                // Creating without knowing could leave two policies with one name
                warn!("Policy existence unknown, skipping create/update");
                PolicyAction::Degraded
            }
        }
    }

    async fn update_policy(&self, policy_id: &str, content: &PolicyContent) -> PolicyAction {
        info!(policy.id = %policy_id, "Updating policy content");
        let outcome = self
            .executor
            .run("UpdatePolicy", classify_default, move || {
                self.control_plane.update_policy(policy_id, content)
            })
            .await;

        if outcome.is_success() {
            info!(policy.id = %policy_id, "Policy updated");
            PolicyAction::Updated(policy_id.to_string())
        } else {
            PolicyAction::Degraded
        }
    }

    async fn create_policy(&self, content: &PolicyContent) -> PolicyAction {
        info!(policy_type = %self.config.policy_type, "Creating policy");
        let outcome = self
            .executor
            .run("CreatePolicy", classify_create, move || {
                self.control_plane.create_policy(content)
            })
            .await;

        match outcome {
            RetryOutcome::Completed(policy_id) => {
                info!(policy.id = %policy_id, "Policy created");
                PolicyAction::Created(policy_id)
            }
            RetryOutcome::Satisfied => {
                // Another run created it first; its content may be older than ours
                info!("Policy was created concurrently, updating it instead");
                match self.resolver.resolve_id(&content.name).await {
                    Lookup::Found(policy_id) => self.update_policy(&policy_id, content).await,
                    Lookup::NotFound | Lookup::Unavailable => PolicyAction::Degraded,
                }
            }
            RetryOutcome::Abandoned { .. } => PolicyAction::Degraded,
        }
    }
}
