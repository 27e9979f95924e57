//! # Error Policy
//!
//! How the queue consumers react to failures.
//!
//! - A failed receive backs off with a Fibonacci delay that resets on the
//!   next successful receive.
//! - A failed message is logged and left unacknowledged, so the queue
//!   redelivers it once its visibility timeout expires.

use crate::controller::backoff::FibonacciBackoff;
use crate::observability::metrics;
use crate::provider::{QueueError, QueueMessage};
use std::time::Duration;
use tracing::{error, warn};

/// Record a failed receive and return how long to wait before the next one
pub fn handle_receive_error(
    stage: &'static str,
    error: &QueueError,
    backoff: &mut FibonacciBackoff,
) -> Duration {
    metrics::increment_queue_receive_errors(stage);
    let delay = backoff.next_backoff();
    warn!(
        stage = stage,
        backoff_secs = delay.as_secs(),
        "Failed to receive messages: {}, retrying with Fibonacci backoff",
        error
    );
    delay
}

/// Record a message that could not be processed
///
/// The message is not deleted; the queue makes it visible again.
pub fn handle_processing_error(stage: &'static str, message: &QueueMessage, error: &anyhow::Error) {
    metrics::increment_queue_messages_failed(stage);
    error!(
        stage = stage,
        message.id = %message.message_id,
        "Processing failed, leaving message for redelivery: {:#}",
        error
    );
}
