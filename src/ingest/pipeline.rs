//! # Ingest Pipeline
//!
//! Turns bucket notifications into change events.
//!
//! | Notification                     | Action                                          |
//! |----------------------------------|-------------------------------------------------|
//! | created `<policy>.zip`           | extract to `<policy>/`, delete archive, `Upload` |
//! | created any other key            | none (fan-out of an extraction)                 |
//! | removed `<policy>.zip`           | none                                            |
//! | removed any other key            | `Delete` with the full key                      |
//!
//! The archive is deleted only after every extracted object has been read
//! back; any earlier failure leaves it in place and the notification on the
//! queue.

use crate::config::SharedControllerConfig;
use crate::controller::event::{parse_notification, ChangeEvent, NotificationKind, ObjectNotification};
use crate::controller::retry::{Disposition, RetryExecutor, RetryOutcome};
use crate::ingest::archive::extract_entries;
use crate::ingest::IngestError;
use crate::observability::metrics;
use crate::provider::{MessageQueue, ObjectStore, QueueMessage, StoreError};
use crate::runtime::watch_loop::MessageProcessor;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// What a notification led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Bundle extracted, archive deleted and an `Upload` event published
    Extracted {
        policy_name: String,
        objects: Vec<String>,
    },
    /// Archive already gone but its policy directory exists; `Upload` published again
    Republished { policy_name: String },
    /// `Delete` event published for the removed key
    DeletePublished { key: String },
    /// Bundle has no file entries; left in place
    EmptyArchive { key: String },
    /// Nothing to do
    Skipped(&'static str),
}

#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn MessageQueue>,
    executor: RetryExecutor,
    config: SharedControllerConfig,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("queue", &self.queue.name())
            .field("archive_extension", &self.config.archive_extension)
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    /// `queue` receives the published change events
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
        config: SharedControllerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            executor: RetryExecutor::for_object_store(config.retry_policy()),
            config,
        }
    }

    /// Handle one notification record
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] when the notification must be redelivered.
    pub async fn handle_notification(
        &self,
        notification: &ObjectNotification,
    ) -> Result<IngestOutcome, IngestError> {
        let span = info_span!(
            "ingest.notification",
            event = %notification.event_name,
            bucket = %notification.bucket,
            key = %notification.key
        );
        async move {
            let is_archive = notification.key.ends_with(&self.config.archive_suffix());
            match (notification.kind, is_archive) {
                (NotificationKind::Created, true) => {
                    self.ingest_archive(&notification.bucket, &notification.key)
                        .await
                }
                (NotificationKind::Created, false) => {
                    debug!("Object written directly, no event needed");
                    Ok(IngestOutcome::Skipped("direct upload"))
                }
                (NotificationKind::Removed, true) => {
                    debug!("Archive removed, no event needed");
                    Ok(IngestOutcome::Skipped("archive removed"))
                }
                (NotificationKind::Removed, false) => {
                    self.publish(ChangeEvent::delete(&notification.bucket, &notification.key))
                        .await?;
                    Ok(IngestOutcome::DeletePublished {
                        key: notification.key.clone(),
                    })
                }
                (NotificationKind::Other, _) => {
                    debug!("Notification kind not handled");
                    Ok(IngestOutcome::Skipped("unhandled event"))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn ingest_archive(&self, bucket: &str, key: &str) -> Result<IngestOutcome, IngestError> {
        let suffix = self.config.archive_suffix();
        let policy_name = key.strip_suffix(suffix.as_str()).unwrap_or(key);
        if policy_name.is_empty() || policy_name.contains('/') {
            warn!("Archive is not at the top level of the bucket, ignoring");
            return Ok(IngestOutcome::Skipped("nested archive"));
        }

        let Some(archive) = self.fetch_archive(bucket, key).await? else {
            return self.republish_if_extracted(bucket, policy_name).await;
        };

        let files = extract_entries(&archive, policy_name).map_err(|e| {
            IngestError::InvalidArchive {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            }
        })?;
        if files.is_empty() {
            warn!("Archive has no file entries, leaving it in place");
            return Ok(IngestOutcome::EmptyArchive {
                key: key.to_string(),
            });
        }

        let mut objects = Vec::with_capacity(files.len());
        for file in &files {
            let object_key = format!("{policy_name}/{}", file.path);
            self.store
                .put_object(bucket, &object_key, file.contents.clone())
                .await
                .map_err(|source| IngestError::Extract {
                    bucket: bucket.to_string(),
                    key: object_key.clone(),
                    source,
                })?;
            info!("Uploaded {} to s3://{}/{}", file.path, bucket, object_key);
            objects.push(object_key);
        }

        for (object_key, file) in objects.iter().zip(&files) {
            self.verify_readback(bucket, object_key, &file.contents)
                .await?;
        }

        self.store
            .delete_object(bucket, key)
            .await
            .map_err(|source| IngestError::CommitFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            })?;
        info!("Deleted archive s3://{}/{}", bucket, key);
        metrics::increment_archives_extracted();

        self.publish(ChangeEvent::upload(bucket, policy_name)).await?;
        Ok(IngestOutcome::Extracted {
            policy_name: policy_name.to_string(),
            objects,
        })
    }

    /// Fetch the archive, retrying transport failures; `None` when it no longer exists
    async fn fetch_archive(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, IngestError> {
        let outcome = self
            .executor
            .run(
                "GetObject",
                |_: &StoreError| Disposition::Retry,
                move || self.store.get_object(bucket, key),
            )
            .await;

        match outcome {
            RetryOutcome::Completed(archive) => Ok(archive),
            RetryOutcome::Satisfied => Ok(None),
            RetryOutcome::Abandoned {
                attempts,
                last_error,
            } => Err(IngestError::ArchiveUnavailable {
                bucket: bucket.to_string(),
                key: key.to_string(),
                attempts,
                message: last_error,
            }),
        }
    }

    /// A redelivered notification finds the archive already committed; the
    /// event from that run may not have been published
    async fn republish_if_extracted(
        &self,
        bucket: &str,
        policy_name: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let definition_key = self.config.definition_key(policy_name);
        match self.store.object_exists(bucket, &definition_key).await {
            Ok(true) => {
                info!("Archive already extracted, publishing the Upload event again");
                self.publish(ChangeEvent::upload(bucket, policy_name)).await?;
                Ok(IngestOutcome::Republished {
                    policy_name: policy_name.to_string(),
                })
            }
            Ok(false) => {
                info!("Archive no longer exists, nothing to ingest");
                Ok(IngestOutcome::Skipped("archive missing"))
            }
            Err(e) => Err(IngestError::Readback {
                bucket: bucket.to_string(),
                key: definition_key,
                message: e.to_string(),
            }),
        }
    }

    /// Read an extracted object back in full and compare it with what was written
    async fn verify_readback(
        &self,
        bucket: &str,
        key: &str,
        expected: &[u8],
    ) -> Result<(), IngestError> {
        let readback_error = |message: String| IngestError::Readback {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        match self.store.get_object(bucket, key).await {
            Ok(Some(body)) if body == expected => {
                debug!(object = %key, bytes = body.len(), "Extracted object verified");
                Ok(())
            }
            Ok(Some(body)) => Err(readback_error(format!(
                "read {} bytes, wrote {}",
                body.len(),
                expected.len()
            ))),
            Ok(None) => Err(readback_error("object not found".to_string())),
            Err(e) => Err(readback_error(e.to_string())),
        }
    }

    async fn publish(&self, event: ChangeEvent) -> Result<(), IngestError> {
        let action = event.action.as_str();
        let message = event.to_outbound();
        let group_id = message.group_id.clone();

        let message_id = self
            .queue
            .send(message)
            .await
            .map_err(|source| IngestError::Publish {
                action: action.to_string(),
                object: event.object_path.clone(),
                source,
            })?;

        metrics::increment_events_published(action);
        info!(
            action = action,
            object = %event.object_path,
            message.id = %message_id,
            message.group_id = %group_id,
            "Published change event"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageProcessor for IngestPipeline {
    fn stage(&self) -> &'static str {
        "ingest"
    }

    async fn process(&self, message: &QueueMessage) -> anyhow::Result<()> {
        let notifications = parse_notification(&message.body)
            .with_context(|| format!("Invalid bucket notification in message {}", message.message_id))?;
        if notifications.is_empty() {
            debug!("Test notification, acknowledging");
            return Ok(());
        }

        for notification in &notifications {
            match self.handle_notification(notification).await {
                Ok(outcome) => debug!(outcome = ?outcome, "Notification handled"),
                Err(e) => {
                    metrics::increment_ingest_errors();
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to ingest {} for s3://{}/{}",
                            notification.event_name, notification.bucket, notification.key
                        )
                    });
                }
            }
        }
        Ok(())
    }
}
