//! # Model
//!
//! Core types shared by the reader, resolver, reconciler and ingest stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque id assigned to a policy by Organizations (e.g. `p-abcd1234`)
pub type PolicyId = String;

/// Account id or organizational unit id a policy can be attached to
pub type TargetId = String;

/// Set of targets. Ordered so attach/detach batches run deterministically.
pub type TargetSet = BTreeSet<TargetId>;

/// Why a reconciliation run was triggered
///
/// Threaded explicitly through every call that behaves differently when the
/// triggering object was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// A definition or bundle was written
    Create,
    /// A declared document was deleted
    Delete,
}

impl ProcessingMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Create => "create",
            ProcessingMode::Delete => "delete",
        }
    }
}

/// Declared documents inside a policy directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Definition,
    TargetList,
}

impl FileKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Definition => "definition",
            FileKind::TargetList => "target_list",
        }
    }
}

/// Result of a lookup against eventually consistent state
///
/// Separates "confirmed absent" from "could not determine", which a plain
/// `Option` conflates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    /// Every attempt failed; the answer is unknown
    Unavailable,
}

impl<T> Lookup<T> {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Lookup::NotFound)
    }

    /// The found value, if any
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::Unavailable => None,
        }
    }

    #[must_use]
    pub fn as_ref(&self) -> Lookup<&T> {
        match self {
            Lookup::Found(value) => Lookup::Found(value),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Unavailable => Lookup::Unavailable,
        }
    }
}

impl<T: Default> Lookup<T> {
    /// The found value, or an empty value when absent or unknown
    #[must_use]
    pub fn or_empty(self) -> T {
        self.found().unwrap_or_default()
    }
}

impl<T> fmt::Display for Lookup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Found(_) => f.write_str("found"),
            Lookup::NotFound => f.write_str("not-found"),
            Lookup::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Target list document (`target_list.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetList {
    pub targets: Vec<TargetId>,
}

impl TargetList {
    /// Declared targets as a set. Duplicates collapse, blank entries are dropped.
    #[must_use]
    pub fn to_set(&self) -> TargetSet {
        self.targets
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

/// Policy definition document (`policy_definition.json`)
///
/// The content is opaque to the controller. It is validated as JSON and
/// submitted compacted, with object keys in their declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyDocument(pub serde_json::Value);

impl PolicyDocument {
    /// Compact JSON submitted as the policy content
    #[must_use]
    pub fn content(&self) -> String {
        self.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_list_to_set_dedups_and_trims() {
        let list: TargetList =
            serde_json::from_str(r#"{"targets": ["ou-b", "111111111111", " ou-b ", ""]}"#)
                .unwrap();
        let set = list.to_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains("ou-b"));
        assert!(set.contains("111111111111"));
    }

    #[test]
    fn test_lookup_or_empty() {
        let found: Lookup<TargetSet> = Lookup::Found(["a".to_string()].into_iter().collect());
        assert_eq!(found.or_empty().len(), 1);
        assert!(Lookup::<TargetSet>::Unavailable.or_empty().is_empty());
        assert!(Lookup::<TargetSet>::NotFound.or_empty().is_empty());
    }

    #[test]
    fn test_policy_document_keeps_key_order() {
        let doc: PolicyDocument = serde_json::from_str(
            r#"{"plans": {"weekly": {"b": 2, "a": 1}, "daily": {}}}"#,
        )
        .unwrap();
        assert_eq!(
            doc.content(),
            r#"{"plans":{"weekly":{"b":2,"a":1},"daily":{}}}"#
        );
    }

    #[test]
    fn test_policy_document_content_is_compact() {
        let doc: PolicyDocument =
            serde_json::from_str("{ \"plans\": { \"daily\": { } } }").unwrap();
        assert_eq!(doc.content(), r#"{"plans":{"daily":{}}}"#);
    }
}
