//! # Types
//!
//! Core types for the reconciler.

use crate::controller::reader::ReaderError;
use crate::model::{PolicyId, TargetId};
use std::fmt;
use thiserror::Error;

/// Failures that abort a run and leave the triggering message for redelivery
///
/// Per-target control-plane failures never surface here; they are counted in
/// [`ReconcileReport::degraded`].
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to read declared state: {0}")]
    DeclaredState(#[from] ReaderError),
}

/// What happened to the policy object itself during a run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PolicyAction {
    /// The run only touched attachments
    #[default]
    Unchanged,
    Created(PolicyId),
    Updated(PolicyId),
    /// Deleted and confirmed gone from the listing
    Deleted(PolicyId),
    /// No definition document; the object step was skipped
    DefinitionMissing,
    /// Nothing to delete: no policy with this name exists
    AlreadyAbsent,
    /// The step could not complete (existence unknown or the call was abandoned)
    Degraded,
}

impl PolicyAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Unchanged => "unchanged",
            PolicyAction::Created(_) => "created",
            PolicyAction::Updated(_) => "updated",
            PolicyAction::Deleted(_) => "deleted",
            PolicyAction::DefinitionMissing => "definition-missing",
            PolicyAction::AlreadyAbsent => "already-absent",
            PolicyAction::Degraded => "degraded",
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one engine entry point
///
/// Informational only: a report with degraded sub-operations is still a
/// successful run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub policy_name: String,
    pub policy_action: PolicyAction,
    /// Targets attached (or found already attached) by this run, in order
    pub attached: Vec<TargetId>,
    /// Targets detached (or found already detached) by this run, in order
    pub detached: Vec<TargetId>,
    /// Declared targets that were attached before the run started
    pub already_converged: usize,
    /// Sub-operations abandoned or skipped because state could not be read
    pub degraded: usize,
}

impl ReconcileReport {
    pub fn new(policy_name: impl Into<String>) -> Self {
        Self {
            policy_name: policy_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded > 0
    }

    /// Fold the attachment counts of `other` into this report
    ///
    /// The policy action of `self` wins unless it is [`PolicyAction::Unchanged`].
    pub fn absorb(&mut self, other: ReconcileReport) {
        if self.policy_action == PolicyAction::Unchanged {
            self.policy_action = other.policy_action;
        }
        self.attached.extend(other.attached);
        self.detached.extend(other.detached);
        self.already_converged += other.already_converged;
        self.degraded += other.degraded;
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "policy={} action={} attached={} detached={} converged={} degraded={}",
            self.policy_name,
            self.policy_action,
            self.attached.len(),
            self.detached.len(),
            self.already_converged,
            self.degraded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_keeps_policy_action() {
        let mut report = ReconcileReport::new("region1");
        report.policy_action = PolicyAction::Created("p-1".to_string());

        let mut attachments = ReconcileReport::new("region1");
        attachments.attached.push("ou-a".to_string());
        attachments.degraded = 1;
        report.absorb(attachments);

        assert_eq!(report.policy_action, PolicyAction::Created("p-1".to_string()));
        assert_eq!(report.attached, vec!["ou-a".to_string()]);
        assert!(report.is_degraded());
    }
}
