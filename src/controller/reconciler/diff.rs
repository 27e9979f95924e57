//! # Attachment Diff
//!
//! Set difference between declared and attached targets.

use crate::model::{TargetId, TargetSet};

/// Attach and detach batches for one policy, each in sorted order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachmentPlan {
    /// declared - attached
    pub to_attach: Vec<TargetId>,
    /// attached - declared
    pub to_detach: Vec<TargetId>,
    /// declared ∩ attached
    pub unchanged: usize,
}

impl AttachmentPlan {
    #[must_use]
    pub fn compute(declared: &TargetSet, attached: &TargetSet) -> Self {
        Self {
            to_attach: declared.difference(attached).cloned().collect(),
            to_detach: attached.difference(declared).cloned().collect(),
            unchanged: declared.intersection(attached).count(),
        }
    }

    /// Plan that detaches every target in `attached`
    #[must_use]
    pub fn detach_all(attached: &TargetSet) -> Self {
        Self::compute(&TargetSet::new(), attached)
    }

    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.to_attach.is_empty() && self.to_detach.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> TargetSet {
        ids.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_overlapping_sets() {
        let plan = AttachmentPlan::compute(&set(&["A", "B"]), &set(&["B", "C"]));
        assert_eq!(plan.to_attach, vec!["A".to_string()]);
        assert_eq!(plan.to_detach, vec!["C".to_string()]);
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_converged() {
        let plan = AttachmentPlan::compute(&set(&["A", "B"]), &set(&["B", "A"]));
        assert!(plan.is_converged());
        assert_eq!(plan.unchanged, 2);
    }

    #[test]
    fn test_batches_are_sorted() {
        let plan = AttachmentPlan::compute(&set(&["ou-z", "ou-a", "123"]), &TargetSet::new());
        assert_eq!(plan.to_attach, vec!["123", "ou-a", "ou-z"]);
    }

    #[test]
    fn test_detach_all() {
        let plan = AttachmentPlan::detach_all(&set(&["A", "B"]));
        assert!(plan.to_attach.is_empty());
        assert_eq!(plan.to_detach.len(), 2);
    }
}
