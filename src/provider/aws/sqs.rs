//! # SQS Queue
//!
//! [`MessageQueue`] backed by Amazon SQS. Message attributes are sent and
//! received as `String` attributes.

use crate::provider::{MessageQueue, OutboundMessage, QueueError, QueueMessage};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client as SqsClient;
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
}

impl std::fmt::Debug for SqsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueue")
            .field("queue_url", &self.queue_url)
            .finish_non_exhaustive()
    }
}

impl SqsQueue {
    #[must_use]
    pub fn new(sdk_config: &SdkConfig, queue_url: impl Into<String>) -> Self {
        Self {
            client: SqsClient::new(sdk_config),
            queue_url: queue_url.into(),
        }
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    fn name(&self) -> &str {
        &self.queue_url
    }

    async fn send(&self, message: OutboundMessage) -> Result<String, QueueError> {
        let mut attributes = HashMap::with_capacity(message.attributes.len());
        for (name, value) in message.attributes {
            let value = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| QueueError::Build(e.to_string()))?;
            attributes.insert(name, value);
        }

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(message.body)
            .message_group_id(message.group_id)
            .set_message_attributes(Some(attributes))
            .send()
            .await
            .map_err(|e| QueueError::Send {
                queue: self.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        debug!(queue = %self.queue_url, message.id = %message_id, "Message sent");
        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_seconds)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| QueueError::Receive {
                queue: self.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let mut messages = Vec::new();
        for message in output.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(queue = %self.queue_url, "Received message without receipt handle, skipping");
                continue;
            };
            let attributes = message
                .message_attributes()
                .map(|attributes| {
                    attributes
                        .iter()
                        .filter_map(|(name, value)| {
                            value
                                .string_value()
                                .map(|v| (name.clone(), v.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();

            messages.push(QueueMessage {
                message_id: message.message_id().unwrap_or_default().to_string(),
                receipt_handle: receipt_handle.to_string(),
                body: message.body().unwrap_or_default().to_string(),
                attributes,
            });
        }
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete {
                queue: self.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}
