//! # Provider Modules
//!
//! Seams between the controller and the services it talks to.
//!
//! - `ControlPlane`: Organizations policy CRUD, attach/detach and listing
//! - `ObjectStore`: S3 objects holding declared state and uploaded bundles
//! - `MessageQueue`: SQS queues carrying change events and notifications
//!
//! `aws` implements them with the AWS SDK, `memory` implements them in memory
//! for tests and local runs.

use crate::model::{PolicyId, TargetId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod aws;
pub mod memory;

/// Structured classification of a control-plane failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPlaneErrorKind {
    /// Rate limited (`TooManyRequestsException`)
    Throttled,
    /// Policy already attached to the target
    DuplicateAttachment,
    /// Policy not attached to the target
    NotAttached,
    /// No policy with the given id
    PolicyNotFound,
    /// A policy with the same name already exists
    DuplicatePolicy,
    /// Another request is modifying the same entity
    ConcurrentModification,
    /// Policy still attached to a target; deletion must wait for detaches
    PolicyInUse,
    /// Request refused as invalid or unauthorized; repeating it will not help
    Rejected,
    /// Transport failure, timeout or service-side fault
    Transient,
    /// Anything not recognised above
    Unknown,
}

impl ControlPlaneErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlPlaneErrorKind::Throttled => "throttled",
            ControlPlaneErrorKind::DuplicateAttachment => "duplicate_attachment",
            ControlPlaneErrorKind::NotAttached => "not_attached",
            ControlPlaneErrorKind::PolicyNotFound => "policy_not_found",
            ControlPlaneErrorKind::DuplicatePolicy => "duplicate_policy",
            ControlPlaneErrorKind::ConcurrentModification => "concurrent_modification",
            ControlPlaneErrorKind::PolicyInUse => "policy_in_use",
            ControlPlaneErrorKind::Rejected => "rejected",
            ControlPlaneErrorKind::Transient => "transient",
            ControlPlaneErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ControlPlaneErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ControlPlaneError {
    pub kind: ControlPlaneErrorKind,
    pub operation: &'static str,
    pub message: String,
}

impl ControlPlaneError {
    pub fn new(
        kind: ControlPlaneErrorKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }
}

/// One page of a paginated list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation token; `None` once the listing is exhausted
    pub next_token: Option<String>,
}

/// Name and id of an existing policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySummary {
    pub id: PolicyId,
    pub name: String,
}

/// Content submitted on create and update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyContent {
    pub name: String,
    pub description: String,
    pub content: String,
}

/// Organizations-style control plane for policies of one managed type
///
/// Every call maps to exactly one API request so the retry executor can wrap it.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List one page of policies of the managed type
    async fn list_policies(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<PolicySummary>, ControlPlaneError>;

    /// Create a policy of the managed type, returning its id
    async fn create_policy(&self, policy: &PolicyContent) -> Result<PolicyId, ControlPlaneError>;

    /// Replace the content of an existing policy
    async fn update_policy(
        &self,
        policy_id: &str,
        policy: &PolicyContent,
    ) -> Result<(), ControlPlaneError>;

    async fn delete_policy(&self, policy_id: &str) -> Result<(), ControlPlaneError>;

    async fn attach_policy(&self, policy_id: &str, target_id: &str)
        -> Result<(), ControlPlaneError>;

    async fn detach_policy(&self, policy_id: &str, target_id: &str)
        -> Result<(), ControlPlaneError>;

    /// List one page of targets the policy is attached to
    async fn list_targets_for_policy(
        &self,
        policy_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<TargetId>, ControlPlaneError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} s3://{bucket}/{key} failed: {message}")]
    Transport {
        operation: &'static str,
        bucket: String,
        key: String,
        message: String,
    },
    #[error("failed to read body of s3://{bucket}/{key}: {message}")]
    Body {
        bucket: String,
        key: String,
        message: String,
    },
}

/// Object storage holding declared state
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when the key does not exist
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Whether the key exists and its metadata is readable
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("failed to send message to {queue}: {message}")]
    Send { queue: String, message: String },
    #[error("failed to receive messages from {queue}: {message}")]
    Receive { queue: String, message: String },
    #[error("failed to delete message from {queue}: {message}")]
    Delete { queue: String, message: String },
}

/// Message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    /// String message attributes
    pub attributes: HashMap<String, String>,
    /// FIFO message group id
    pub group_id: String,
}

/// Message received from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle used to delete the message once processed
    pub receipt_handle: String,
    pub body: String,
    /// String message attributes
    pub attributes: HashMap<String, String>,
}

/// Durable queue with explicit acknowledgement
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue identifier used in logs
    fn name(&self) -> &str;

    /// Publish a message, returning the assigned message id
    async fn send(&self, message: OutboundMessage) -> Result<String, QueueError>;

    /// Long-poll for up to `max_messages` messages
    async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a processed message
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
