//! # Policy State Resolver
//!
//! Answers two questions against the live control plane: does a policy with
//! this name exist (and what is its id), and which targets is it attached to.
//!
//! Both listings follow continuation tokens to the end. A listing that fails
//! part-way is retried from the first page, with the retry policy's sleep in
//! front of every attempt. When every attempt fails the answer is
//! [`Lookup::Unavailable`], never a guess.

use crate::controller::retry::{classify_default, Disposition, RetryExecutor, RetryOutcome};
use crate::model::{Lookup, PolicyId, TargetSet};
use crate::provider::{ControlPlane, ControlPlaneError, ControlPlaneErrorKind, PolicySummary};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Clone)]
pub struct PolicyStateResolver {
    control_plane: Arc<dyn ControlPlane>,
    executor: RetryExecutor,
}

impl std::fmt::Debug for PolicyStateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStateResolver")
            .field("retry_policy", self.executor.policy())
            .finish_non_exhaustive()
    }
}

impl PolicyStateResolver {
    pub fn new(control_plane: Arc<dyn ControlPlane>, executor: RetryExecutor) -> Self {
        Self {
            control_plane,
            executor,
        }
    }

    /// Id of the policy named `policy_name`
    pub async fn resolve_id(&self, policy_name: &str) -> Lookup<PolicyId> {
        let span = info_span!("resolve_policy_id", policy.name = %policy_name);
        async {
            let outcome = self
                .executor
                .run("ListPolicies", classify_default, move || {
                    self.find_policy_once(policy_name)
                })
                .await;

            match outcome {
                RetryOutcome::Completed(Some(policy_id)) => {
                    debug!(policy.id = %policy_id, "Policy found");
                    Lookup::Found(policy_id)
                }
                RetryOutcome::Completed(None) => {
                    debug!("No policy with this name");
                    Lookup::NotFound
                }
                RetryOutcome::Satisfied | RetryOutcome::Abandoned { .. } => {
                    warn!("Could not determine whether the policy exists");
                    Lookup::Unavailable
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Targets the policy is currently attached to
    ///
    /// A policy that vanished while listing resolves to [`Lookup::NotFound`].
    pub async fn list_attached_targets(&self, policy_id: &str) -> Lookup<TargetSet> {
        let span = info_span!("list_attached_targets", policy.id = %policy_id);
        async {
            let outcome = self
                .executor
                .run("ListTargetsForPolicy", classify_target_listing, move || {
                    self.attached_targets_once(policy_id)
                })
                .await;

            match outcome {
                RetryOutcome::Completed(targets) => {
                    debug!(count = targets.len(), "Attached targets listed");
                    Lookup::Found(targets)
                }
                RetryOutcome::Satisfied => {
                    debug!("Policy no longer exists");
                    Lookup::NotFound
                }
                RetryOutcome::Abandoned { .. } => {
                    warn!("Could not list attached targets");
                    Lookup::Unavailable
                }
            }
        }
        .instrument(span)
        .await
    }

    /// One full pass over the policy listing, without retries or sleeps
    ///
    /// # Errors
    ///
    /// Returns the first page error.
    pub async fn find_policy_once(
        &self,
        policy_name: &str,
    ) -> Result<Option<PolicyId>, ControlPlaneError> {
        let policies = self.list_all_policies().await?;
        Ok(policies
            .into_iter()
            .find(|policy| policy.name == policy_name)
            .map(|policy| policy.id))
    }

    async fn list_all_policies(&self) -> Result<Vec<PolicySummary>, ControlPlaneError> {
        let mut policies = Vec::new();
        let mut next_token = None;
        loop {
            let page = self.control_plane.list_policies(next_token).await?;
            policies.extend(page.items);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => return Ok(policies),
            }
        }
    }

    async fn attached_targets_once(&self, policy_id: &str) -> Result<TargetSet, ControlPlaneError> {
        let mut targets = TargetSet::new();
        let mut next_token = None;
        loop {
            let page = self
                .control_plane
                .list_targets_for_policy(policy_id, next_token)
                .await?;
            targets.extend(page.items);
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => return Ok(targets),
            }
        }
    }
}

/// A policy that disappeared has no attachments left to list
fn classify_target_listing(error: &ControlPlaneError) -> Disposition {
    match error.kind {
        ControlPlaneErrorKind::PolicyNotFound => Disposition::Satisfied,
        _ => classify_default(error),
    }
}
