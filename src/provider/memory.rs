//! # In-Memory Providers
//!
//! [`ControlPlane`], [`ObjectStore`] and [`MessageQueue`] backed by process
//! memory. They mirror the service semantics the controller relies on
//! (paginated listings, duplicate/not-attached errors, in-use policies,
//! missing keys) and let tests script failures and inspect every call.

use crate::model::{PolicyId, TargetId, TargetSet};
use crate::provider::{
    ControlPlane, ControlPlaneError, ControlPlaneErrorKind, MessageQueue, ObjectStore,
    OutboundMessage, Page, PolicyContent, PolicySummary, QueueError, QueueMessage, StoreError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_PAGE_SIZE: usize = 20;

/// A control-plane request as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneCall {
    pub operation: &'static str,
    pub policy_id: Option<PolicyId>,
    pub target_id: Option<TargetId>,
}

impl ControlPlaneCall {
    /// Attach, detach, create, update or delete
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !self.operation.starts_with("List")
    }
}

#[derive(Debug, Clone)]
struct StoredPolicy {
    name: String,
    description: String,
    content: String,
}

#[derive(Debug)]
struct ScriptedFailure {
    operation: &'static str,
    target_id: Option<TargetId>,
    kind: ControlPlaneErrorKind,
    remaining: u32,
}

#[derive(Debug, Default)]
struct ControlPlaneState {
    policies: BTreeMap<PolicyId, StoredPolicy>,
    attachments: BTreeMap<PolicyId, TargetSet>,
    calls: Vec<ControlPlaneCall>,
    failures: Vec<ScriptedFailure>,
    next_id: u64,
}

impl ControlPlaneState {
    fn id_for(&self, name: &str) -> Option<PolicyId> {
        self.policies
            .iter()
            .find(|(_, policy)| policy.name == name)
            .map(|(id, _)| id.clone())
    }

    fn insert(&mut self, policy: StoredPolicy) -> PolicyId {
        self.next_id += 1;
        let id = format!("p-{:08x}", self.next_id);
        self.policies.insert(id.clone(), policy);
        id
    }

    /// Record the call and consume a matching scripted failure, if any
    fn begin(
        &mut self,
        operation: &'static str,
        policy_id: Option<&str>,
        target_id: Option<&str>,
    ) -> Result<(), ControlPlaneError> {
        self.calls.push(ControlPlaneCall {
            operation,
            policy_id: policy_id.map(ToString::to_string),
            target_id: target_id.map(ToString::to_string),
        });

        let scripted = self.failures.iter_mut().find(|failure| {
            failure.remaining > 0
                && failure.operation == operation
                && (failure.target_id.is_none() || failure.target_id.as_deref() == target_id)
        });
        if let Some(failure) = scripted {
            failure.remaining -= 1;
            return Err(ControlPlaneError::new(
                failure.kind,
                operation,
                "scripted failure",
            ));
        }
        Ok(())
    }

    fn require_policy(
        &self,
        operation: &'static str,
        policy_id: &str,
    ) -> Result<(), ControlPlaneError> {
        if self.policies.contains_key(policy_id) {
            Ok(())
        } else {
            Err(ControlPlaneError::new(
                ControlPlaneErrorKind::PolicyNotFound,
                operation,
                format!("policy {policy_id} does not exist"),
            ))
        }
    }
}

/// In-memory Organizations control plane for a single policy type
#[derive(Debug)]
pub struct InMemoryControlPlane {
    state: Mutex<ControlPlaneState>,
    page_size: usize,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryControlPlane {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlPlaneState::default()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Items per page on every listing
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, ControlPlaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a policy without recording a call
    pub fn seed_policy(&self, name: &str, content: &str) -> PolicyId {
        self.state().insert(StoredPolicy {
            name: name.to_string(),
            description: String::new(),
            content: content.to_string(),
        })
    }

    /// Attach a policy without recording a call
    pub fn seed_attachment(&self, policy_id: &str, target_id: &str) {
        self.state()
            .attachments
            .entry(policy_id.to_string())
            .or_default()
            .insert(target_id.to_string());
    }

    /// Fail the next `times` calls of `operation` with `kind`
    pub fn fail_next(&self, operation: &'static str, kind: ControlPlaneErrorKind, times: u32) {
        self.state().failures.push(ScriptedFailure {
            operation,
            target_id: None,
            kind,
            remaining: times,
        });
    }

    /// Fail the next `times` calls of `operation` addressed to `target_id`
    pub fn fail_target(
        &self,
        operation: &'static str,
        target_id: &str,
        kind: ControlPlaneErrorKind,
        times: u32,
    ) {
        self.state().failures.push(ScriptedFailure {
            operation,
            target_id: Some(target_id.to_string()),
            kind,
            remaining: times,
        });
    }

    #[must_use]
    pub fn policy_id(&self, name: &str) -> Option<PolicyId> {
        self.state().id_for(name)
    }

    #[must_use]
    pub fn policy_count(&self) -> usize {
        self.state().policies.len()
    }

    /// Content and description of the named policy
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<(String, String)> {
        self.state()
            .policies
            .values()
            .find(|policy| policy.name == name)
            .map(|policy| (policy.content.clone(), policy.description.clone()))
    }

    #[must_use]
    pub fn attached_targets(&self, policy_id: &str) -> TargetSet {
        self.state()
            .attachments
            .get(policy_id)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.state().calls.clone()
    }

    #[must_use]
    pub fn calls_named(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Mutating calls in the order they were received
    #[must_use]
    pub fn mutations(&self) -> Vec<ControlPlaneCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn page<T: Clone>(
        &self,
        operation: &'static str,
        items: &[T],
        next_token: Option<&str>,
    ) -> Result<Page<T>, ControlPlaneError> {
        let offset = match next_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                ControlPlaneError::new(
                    ControlPlaneErrorKind::Rejected,
                    operation,
                    format!("invalid NextToken '{token}'"),
                )
            })?,
        };
        let end = (offset + self.page_size).min(items.len());
        let page_items = items.get(offset..end).unwrap_or_default().to_vec();
        let next_token = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: page_items,
            next_token,
        })
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn list_policies(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<PolicySummary>, ControlPlaneError> {
        let summaries: Vec<PolicySummary> = {
            let mut state = self.state();
            state.begin("ListPolicies", None, None)?;
            state
                .policies
                .iter()
                .map(|(id, policy)| PolicySummary {
                    id: id.clone(),
                    name: policy.name.clone(),
                })
                .collect()
        };
        self.page("ListPolicies", &summaries, next_token.as_deref())
    }

    async fn create_policy(&self, policy: &PolicyContent) -> Result<PolicyId, ControlPlaneError> {
        let mut state = self.state();
        state.begin("CreatePolicy", None, None)?;
        if state.id_for(&policy.name).is_some() {
            return Err(ControlPlaneError::new(
                ControlPlaneErrorKind::DuplicatePolicy,
                "CreatePolicy",
                format!("a policy named {} already exists", policy.name),
            ));
        }
        Ok(state.insert(StoredPolicy {
            name: policy.name.clone(),
            description: policy.description.clone(),
            content: policy.content.clone(),
        }))
    }

    async fn update_policy(
        &self,
        policy_id: &str,
        policy: &PolicyContent,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state();
        state.begin("UpdatePolicy", Some(policy_id), None)?;
        state.require_policy("UpdatePolicy", policy_id)?;
        if let Some(stored) = state.policies.get_mut(policy_id) {
            stored.name.clone_from(&policy.name);
            stored.description.clone_from(&policy.description);
            stored.content.clone_from(&policy.content);
        }
        Ok(())
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.state();
        state.begin("DeletePolicy", Some(policy_id), None)?;
        state.require_policy("DeletePolicy", policy_id)?;
        if state
            .attachments
            .get(policy_id)
            .is_some_and(|targets| !targets.is_empty())
        {
            return Err(ControlPlaneError::new(
                ControlPlaneErrorKind::PolicyInUse,
                "DeletePolicy",
                format!("policy {policy_id} is still attached"),
            ));
        }
        state.policies.remove(policy_id);
        state.attachments.remove(policy_id);
        Ok(())
    }

    async fn attach_policy(
        &self,
        policy_id: &str,
        target_id: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state();
        state.begin("AttachPolicy", Some(policy_id), Some(target_id))?;
        state.require_policy("AttachPolicy", policy_id)?;
        let targets = state.attachments.entry(policy_id.to_string()).or_default();
        if targets.insert(target_id.to_string()) {
            Ok(())
        } else {
            Err(ControlPlaneError::new(
                ControlPlaneErrorKind::DuplicateAttachment,
                "AttachPolicy",
                format!("policy {policy_id} is already attached to {target_id}"),
            ))
        }
    }

    async fn detach_policy(
        &self,
        policy_id: &str,
        target_id: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state();
        state.begin("DetachPolicy", Some(policy_id), Some(target_id))?;
        state.require_policy("DetachPolicy", policy_id)?;
        let removed = state
            .attachments
            .get_mut(policy_id)
            .is_some_and(|targets| targets.remove(target_id));
        if removed {
            Ok(())
        } else {
            Err(ControlPlaneError::new(
                ControlPlaneErrorKind::NotAttached,
                "DetachPolicy",
                format!("policy {policy_id} is not attached to {target_id}"),
            ))
        }
    }

    async fn list_targets_for_policy(
        &self,
        policy_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<TargetId>, ControlPlaneError> {
        let targets: Vec<TargetId> = {
            let mut state = self.state();
            state.begin("ListTargetsForPolicy", Some(policy_id), None)?;
            state.require_policy("ListTargetsForPolicy", policy_id)?;
            state
                .attachments
                .get(policy_id)
                .map(|targets| targets.iter().cloned().collect())
                .unwrap_or_default()
        };
        self.page("ListTargetsForPolicy", &targets, next_token.as_deref())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<(String, String), Vec<u8>>,
    get_count: usize,
    fail_reads: bool,
    failing_reads: u32,
    failing_puts: HashSet<String>,
    lost_puts: HashSet<String>,
    unreadable: HashSet<String>,
    truncated_puts: HashSet<String>,
    fail_deletes: bool,
}

/// In-memory object store
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<StoreState>,
}

impl InMemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl AsRef<[u8]>) {
        self.state()
            .objects
            .insert((bucket.to_string(), key.to_string()), body.as_ref().to_vec());
    }

    #[must_use]
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.get(bucket, key).is_some()
    }

    /// Keys stored in `bucket`, sorted
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Number of `get_object` calls served
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.state().get_count
    }

    /// Fail every `get_object` while set
    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    /// Fail the next `times` calls to `get_object`
    pub fn fail_next_reads(&self, times: u32) {
        self.state().failing_reads = times;
    }

    /// Fail every `put_object` to `key`
    pub fn fail_puts_to(&self, key: &str) {
        self.state().failing_puts.insert(key.to_string());
    }

    /// Accept `put_object` to `key` without storing it
    pub fn lose_puts_to(&self, key: &str) {
        self.state().lost_puts.insert(key.to_string());
    }

    /// Fail every `get_object` of `key`; `object_exists` still sees it
    pub fn fail_reads_of(&self, key: &str) {
        self.state().unreadable.insert(key.to_string());
    }

    /// Store only the first half of every body written to `key`
    pub fn truncate_puts_to(&self, key: &str) {
        self.state().truncated_puts.insert(key.to_string());
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    fn transport_error(operation: &'static str, bucket: &str, key: &str) -> StoreError {
        StoreError::Transport {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut state = self.state();
        state.get_count += 1;
        if state.fail_reads || state.unreadable.contains(key) {
            return Err(Self::transport_error("GetObject", bucket, key));
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(Self::transport_error("GetObject", bucket, key));
        }
        Ok(state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    async fn put_object(&self, bucket: &str, key: &str, mut body: Vec<u8>) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.truncated_puts.contains(key) {
            body.truncate(body.len() / 2);
        }
        if state.failing_puts.contains(key) {
            return Err(Self::transport_error("PutObject", bucket, key));
        }
        if !state.lost_puts.contains(key) {
            state
                .objects
                .insert((bucket.to_string(), key.to_string()), body);
        }
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(Self::transport_error("DeleteObject", bucket, key));
        }
        state
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let state = self.state();
        if state.fail_reads {
            return Err(Self::transport_error("HeadObject", bucket, key));
        }
        Ok(state
            .objects
            .contains_key(&(bucket.to_string(), key.to_string())))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueMessage>,
    in_flight: HashMap<String, QueueMessage>,
    sent: Vec<OutboundMessage>,
    deleted: Vec<String>,
    next_id: u64,
    fail_sends: bool,
    failing_receives: u32,
}

impl QueueState {
    fn enqueue(&mut self, body: String, attributes: HashMap<String, String>) -> String {
        self.next_id += 1;
        let message_id = format!("m-{}", self.next_id);
        self.pending.push_back(QueueMessage {
            message_id: message_id.clone(),
            receipt_handle: format!("r-{}", self.next_id),
            body,
            attributes,
        });
        message_id
    }
}

/// In-memory queue with SQS-style receive and delete
///
/// Received messages stay in flight until deleted; `requeue_in_flight`
/// simulates the visibility timeout expiring.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a message as if another producer had sent it
    pub fn push(&self, body: impl Into<String>, attributes: HashMap<String, String>) -> String {
        self.state().enqueue(body.into(), attributes)
    }

    /// Every message sent through [`MessageQueue::send`]
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state().sent.clone()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.state().deleted.len()
    }

    /// Make every unacknowledged message visible again
    pub fn requeue_in_flight(&self) {
        let mut state = self.state();
        let mut messages: Vec<QueueMessage> = state.in_flight.drain().map(|(_, m)| m).collect();
        messages.sort_by(|a, b| a.message_id.cmp(&b.message_id));
        for message in messages {
            state.pending.push_back(message);
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    /// Fail the next `times` receive calls
    pub fn fail_next_receives(&self, times: u32) {
        self.state().failing_receives = times;
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: OutboundMessage) -> Result<String, QueueError> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(QueueError::Send {
                queue: self.name.clone(),
                message: "scripted failure".to_string(),
            });
        }
        state.sent.push(message.clone());
        Ok(state.enqueue(message.body, message.attributes))
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let received = {
            let mut state = self.state();
            if state.failing_receives > 0 {
                state.failing_receives -= 1;
                return Err(QueueError::Receive {
                    queue: self.name.clone(),
                    message: "scripted failure".to_string(),
                });
            }
            let limit = usize::try_from(max_messages.max(1)).unwrap_or(1);
            let mut received = Vec::new();
            while received.len() < limit {
                let Some(message) = state.pending.pop_front() else {
                    break;
                };
                state
                    .in_flight
                    .insert(message.receipt_handle.clone(), message.clone());
                received.push(message);
            }
            received
        };

        // Long poll: an empty receive waits out the full wait time
        if received.is_empty() && wait_time_seconds > 0 {
            let wait = u64::try_from(wait_time_seconds).unwrap_or_default();
            tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
        }
        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        if state.in_flight.remove(receipt_handle).is_none() {
            return Err(QueueError::Delete {
                queue: self.name.clone(),
                message: format!("receipt handle {receipt_handle} is not in flight"),
            });
        }
        state.deleted.push(receipt_handle.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_control_plane_semantics() {
        let control_plane = InMemoryControlPlane::new();
        let policy = PolicyContent {
            name: "region1".to_string(),
            description: "d".to_string(),
            content: "{}".to_string(),
        };

        let id = control_plane.create_policy(&policy).await.unwrap();
        let duplicate = control_plane.create_policy(&policy).await.unwrap_err();
        assert_eq!(duplicate.kind, ControlPlaneErrorKind::DuplicatePolicy);

        control_plane.attach_policy(&id, "ou-a").await.unwrap();
        let again = control_plane.attach_policy(&id, "ou-a").await.unwrap_err();
        assert_eq!(again.kind, ControlPlaneErrorKind::DuplicateAttachment);

        let in_use = control_plane.delete_policy(&id).await.unwrap_err();
        assert_eq!(in_use.kind, ControlPlaneErrorKind::PolicyInUse);

        control_plane.detach_policy(&id, "ou-a").await.unwrap();
        let not_attached = control_plane.detach_policy(&id, "ou-a").await.unwrap_err();
        assert_eq!(not_attached.kind, ControlPlaneErrorKind::NotAttached);

        control_plane.delete_policy(&id).await.unwrap();
        assert_eq!(control_plane.policy_count(), 0);
    }

    #[tokio::test]
    async fn test_pagination_tokens() {
        let control_plane = InMemoryControlPlane::new().with_page_size(2);
        for name in ["a", "b", "c"] {
            control_plane.seed_policy(name, "{}");
        }

        let first = control_plane.list_policies(None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let second = control_plane.list_policies(first.next_token).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_scripted_target_failure() {
        let control_plane = InMemoryControlPlane::new();
        let id = control_plane.seed_policy("p", "{}");
        control_plane.fail_target("AttachPolicy", "ou-x", ControlPlaneErrorKind::Throttled, 1);

        assert!(control_plane.attach_policy(&id, "ou-y").await.is_ok());
        assert!(control_plane.attach_policy(&id, "ou-x").await.is_err());
        assert!(control_plane.attach_policy(&id, "ou-x").await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_acknowledgement() {
        let queue = InMemoryQueue::new("changes.fifo");
        queue.push("hello", HashMap::new());

        let received = queue.receive(10, 0).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(queue.in_flight_count(), 1);

        queue.delete(&received[0].receipt_handle).await.unwrap();
        assert_eq!(queue.in_flight_count(), 0);
        assert!(queue.delete(&received[0].receipt_handle).await.is_err());
    }
}
