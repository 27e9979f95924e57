//! # Events
//!
//! Change events carried on the reconcile queue and the S3 event
//! notifications consumed by the ingest stage.
//!
//! A change event travels as three string message attributes:
//!
//! | Attribute       | Value                                                   |
//! |-----------------|---------------------------------------------------------|
//! | `Bucket`        | bucket holding the declared state                       |
//! | `UpdatedObject` | policy name (`Upload`) or the deleted key (`Delete`)    |
//! | `Action`        | `Upload` or `Delete`                                    |

use crate::constants::{ATTRIBUTE_ACTION, ATTRIBUTE_BUCKET, ATTRIBUTE_UPDATED_OBJECT};
use crate::provider::OutboundMessage;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("message attribute '{0}' is missing")]
    MissingAttribute(&'static str),
    #[error("unknown action '{0}' (expected Upload or Delete)")]
    UnknownAction(String),
    #[error("object path '{0}' does not name a policy")]
    EmptyObjectPath(String),
    #[error("malformed S3 event notification: {0}")]
    MalformedNotification(String),
}

/// What happened to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Upload,
    Delete,
}

impl ChangeAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Upload => "Upload",
            ChangeAction::Delete => "Delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeAction {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Upload" => Ok(ChangeAction::Upload),
            "Delete" => Ok(ChangeAction::Delete),
            other => Err(EventError::UnknownAction(other.to_string())),
        }
    }
}

/// A change to declared state, addressed to the reconcile stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub bucket: String,
    /// Policy name for uploads, full object key for deletions
    pub object_path: String,
    pub action: ChangeAction,
}

impl ChangeEvent {
    /// A bundle for `policy_name` was extracted
    pub fn upload(bucket: impl Into<String>, policy_name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_path: policy_name.into(),
            action: ChangeAction::Upload,
        }
    }

    /// The object at `key` was deleted
    pub fn delete(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_path: key.into(),
            action: ChangeAction::Delete,
        }
    }

    /// Decode an event from queue message attributes
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] when an attribute is missing, the action is not
    /// recognised, or the object path does not start with a policy name.
    pub fn from_attributes(attributes: &HashMap<String, String>) -> Result<Self, EventError> {
        let attribute = |name: &'static str| {
            attributes
                .get(name)
                .map(String::as_str)
                .ok_or(EventError::MissingAttribute(name))
        };

        let bucket = attribute(ATTRIBUTE_BUCKET)?;
        let object_path = attribute(ATTRIBUTE_UPDATED_OBJECT)?;
        let action = attribute(ATTRIBUTE_ACTION)?.parse()?;

        let event = Self {
            bucket: bucket.to_string(),
            object_path: object_path.to_string(),
            action,
        };
        if event.bucket.is_empty() {
            return Err(EventError::MissingAttribute(ATTRIBUTE_BUCKET));
        }
        if event.policy_name().is_empty() {
            return Err(EventError::EmptyObjectPath(event.object_path));
        }
        Ok(event)
    }

    /// Policy the event refers to: the first path segment of the object path
    #[must_use]
    pub fn policy_name(&self) -> &str {
        self.object_path
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
    }

    /// Message to publish, with a fresh group id so that changes to the same
    /// policy are never deduplicated against each other
    #[must_use]
    pub fn to_outbound(&self) -> OutboundMessage {
        let body = match self.action {
            ChangeAction::Upload => {
                format!("S3 Object {} uploaded to {}", self.object_path, self.bucket)
            }
            ChangeAction::Delete => {
                format!("S3 Object {} deleted from {}", self.object_path, self.bucket)
            }
        };
        let attributes = HashMap::from([
            (ATTRIBUTE_BUCKET.to_string(), self.bucket.clone()),
            (ATTRIBUTE_UPDATED_OBJECT.to_string(), self.object_path.clone()),
            (ATTRIBUTE_ACTION.to_string(), self.action.as_str().to_string()),
        ]);
        OutboundMessage {
            body,
            attributes,
            group_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Kind of S3 notification, from its `eventName`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// `ObjectCreated:*`
    Created,
    /// `ObjectRemoved:*`
    Removed,
    /// Anything else (restore, replication, lifecycle transitions)
    Other,
}

/// One record of an S3 event notification, key already URL-decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNotification {
    pub kind: NotificationKind,
    pub event_name: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
struct S3Notification {
    #[serde(rename = "Records", default)]
    records: Vec<S3EventRecord>,
    #[serde(rename = "Event")]
    event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Parse an S3 event notification body
///
/// `s3:TestEvent` messages, sent when the notification is first configured,
/// parse to an empty list.
///
/// # Errors
///
/// Returns [`EventError::MalformedNotification`] when the body is not a
/// notification document.
pub fn parse_notification(body: &str) -> Result<Vec<ObjectNotification>, EventError> {
    let notification: S3Notification = serde_json::from_str(body)
        .map_err(|e| EventError::MalformedNotification(e.to_string()))?;

    if notification.event.as_deref() == Some("s3:TestEvent") {
        return Ok(Vec::new());
    }
    if notification.records.is_empty() {
        return Err(EventError::MalformedNotification(
            "notification has no Records".to_string(),
        ));
    }

    Ok(notification
        .records
        .into_iter()
        .map(|record| {
            let kind = if record.event_name.starts_with("ObjectCreated") {
                NotificationKind::Created
            } else if record.event_name.starts_with("ObjectRemoved") {
                NotificationKind::Removed
            } else {
                NotificationKind::Other
            };
            ObjectNotification {
                kind,
                event_name: record.event_name,
                bucket: record.s3.bucket.name,
                key: decode_key(&record.s3.object.key),
            }
        })
        .collect())
}

/// Decode an object key as S3 encodes it in notifications
///
/// `+` is a space and `%XX` is a byte. Malformed escapes are kept verbatim.
#[must_use]
pub fn decode_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_attributes_delete() {
        let event = ChangeEvent::from_attributes(&attributes(&[
            ("Bucket", "policies"),
            ("UpdatedObject", "region1/target_list.json"),
            ("Action", "Delete"),
        ]))
        .unwrap();

        assert_eq!(event.action, ChangeAction::Delete);
        assert_eq!(event.policy_name(), "region1");
    }

    #[test]
    fn test_upload_without_slash_is_the_policy_name() {
        let event = ChangeEvent::upload("policies", "region1");
        assert_eq!(event.policy_name(), "region1");
    }

    #[test]
    fn test_from_attributes_rejects_bad_input() {
        assert_eq!(
            ChangeEvent::from_attributes(&attributes(&[("Bucket", "b"), ("Action", "Upload")])),
            Err(EventError::MissingAttribute("UpdatedObject"))
        );
        assert_eq!(
            ChangeEvent::from_attributes(&attributes(&[
                ("Bucket", "b"),
                ("UpdatedObject", "region1"),
                ("Action", "Rename"),
            ])),
            Err(EventError::UnknownAction("Rename".to_string()))
        );
        assert_eq!(
            ChangeEvent::from_attributes(&attributes(&[
                ("Bucket", "b"),
                ("UpdatedObject", "/policy_definition.json"),
                ("Action", "Delete"),
            ])),
            Err(EventError::EmptyObjectPath(
                "/policy_definition.json".to_string()
            ))
        );
    }

    #[test]
    fn test_to_outbound_uses_fresh_group_ids() {
        let event = ChangeEvent::upload("policies", "region1");
        let first = event.to_outbound();
        let second = event.to_outbound();

        assert_ne!(first.group_id, second.group_id);
        assert!(Uuid::parse_str(&first.group_id).is_ok());
        assert_eq!(first.attributes.get("Action").map(String::as_str), Some("Upload"));
        assert_eq!(
            first.attributes.get("UpdatedObject").map(String::as_str),
            Some("region1")
        );
        assert_eq!(ChangeEvent::from_attributes(&first.attributes), Ok(event));
    }

    #[test]
    fn test_parse_notification() {
        let body = r#"{"Records":[{"eventName":"ObjectRemoved:Delete","s3":{"bucket":{"name":"policies"},"object":{"key":"eu+west%2Fdaily/target_list.json"}}}]}"#;
        let records = parse_notification(body).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, NotificationKind::Removed);
        assert_eq!(records[0].bucket, "policies");
        assert_eq!(records[0].key, "eu west/daily/target_list.json");
    }

    #[test]
    fn test_parse_test_event() {
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"policies"}"#;
        assert!(parse_notification(body).unwrap().is_empty());
        assert!(matches!(
            parse_notification("not json"),
            Err(EventError::MalformedNotification(_))
        ));
    }

    #[test]
    fn test_decode_key_keeps_malformed_escapes() {
        assert_eq!(decode_key("a%2"), "a%2");
        assert_eq!(decode_key("a%zz"), "a%zz");
        assert_eq!(decode_key("region1.zip"), "region1.zip");
    }

    #[test]
    fn test_decode_key_escapes() {
        assert_eq!(decode_key("eu+west%2Fdaily.zip"), "eu west/daily.zip");
        assert_eq!(decode_key("a%2Bb"), "a+b");
        assert_eq!(decode_key("caf%C3%A9"), "café");
    }
}
