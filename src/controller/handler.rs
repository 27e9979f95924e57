//! # Change Event Handler
//!
//! Reconcile-stage entry point: decodes a queued change event and routes it
//! to the reconciler.
//!
//! | Event                               | Action                                   |
//! |-------------------------------------|------------------------------------------|
//! | `Upload <policy_name>`              | create/update policy, then attachments   |
//! | `Delete <policy>/<target list>`     | attachments with declared targets = ∅    |
//! | `Delete <policy>/<definition>`      | detach every target, delete the policy   |
//! | `Delete <policy>.zip`               | skipped                                  |
//! | `Delete` of any other key           | logged and acknowledged                  |

use crate::config::SharedControllerConfig;
use crate::controller::event::{ChangeAction, ChangeEvent};
use crate::controller::reconciler::{ReconcileReport, Reconciler, ReconcilerError};
use crate::model::ProcessingMode;
use crate::observability::metrics;
use crate::provider::QueueMessage;
use crate::runtime::watch_loop::MessageProcessor;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct ChangeEventHandler {
    reconciler: Reconciler,
    config: SharedControllerConfig,
}

impl ChangeEventHandler {
    pub fn new(reconciler: Reconciler, config: SharedControllerConfig) -> Self {
        Self { reconciler, config }
    }

    /// Handle one change event
    ///
    /// Returns `Ok(None)` for events that need no reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcilerError`] when declared state cannot be read; the
    /// message must then stay on the queue for redelivery.
    pub async fn handle(
        &self,
        event: &ChangeEvent,
    ) -> Result<Option<ReconcileReport>, ReconcilerError> {
        let policy_name = event.policy_name();
        let span = info_span!(
            "handle_change_event",
            action = %event.action,
            policy.name = %policy_name,
            object = %event.object_path
        );

        async move {
            info!("Evaluating backup policy {}", policy_name);
            match event.action {
                ChangeAction::Upload => self
                    .reconciler
                    .reconcile_policy_object(&event.bucket, policy_name)
                    .await
                    .map(Some),
                ChangeAction::Delete => self.handle_delete(event, policy_name).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_delete(
        &self,
        event: &ChangeEvent,
        policy_name: &str,
    ) -> Result<Option<ReconcileReport>, ReconcilerError> {
        let key = event.object_path.as_str();

        if key.ends_with(&self.config.archive_suffix()) {
            info!("Deleted object is a policy bundle, skipping");
            return Ok(None);
        }

        if key == self.config.target_list_key(policy_name) {
            info!(
                "Target list deleted from s3://{}/{}, reconciling attachments",
                event.bucket, key
            );
            return self
                .reconciler
                .reconcile_attachments(&event.bucket, policy_name, ProcessingMode::Delete)
                .await
                .map(Some);
        }

        if key == self.config.definition_key(policy_name) {
            info!(
                "Policy definition deleted from s3://{}/{}, detaching targets and deleting the policy",
                event.bucket, key
            );
            return Ok(Some(self.reconciler.retire_policy(policy_name).await));
        }

        info!("Deleted object is not a declared document, nothing to reconcile");
        Ok(None)
    }
}

#[async_trait]
impl MessageProcessor for ChangeEventHandler {
    fn stage(&self) -> &'static str {
        "reconcile"
    }

    async fn process(&self, message: &QueueMessage) -> anyhow::Result<()> {
        let event = ChangeEvent::from_attributes(&message.attributes)
            .with_context(|| format!("Invalid change event in message {}", message.message_id))?;

        let start = Instant::now();
        metrics::increment_reconciliations();
        let result = self.handle(&event).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(Some(report)) => {
                if report.is_degraded() {
                    info!("Reconciliation finished with degraded sub-operations: {}", report);
                } else {
                    info!("Reconciliation finished: {}", report);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                metrics::increment_reconciliation_errors();
                error!(policy.name = %event.policy_name(), "Reconciliation failed: {}", e);
                Err(e).context(format!(
                    "Failed to reconcile {} event for {}",
                    event.action, event.object_path
                ))
            }
        }
    }
}
