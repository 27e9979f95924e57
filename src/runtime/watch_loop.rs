//! # Watch Loop
//!
//! Long-polls a queue and hands each message to a [`MessageProcessor`].
//!
//! A message is deleted only after it was processed successfully. Failed
//! messages stay on the queue and are redelivered after their visibility
//! timeout. On shutdown the loop stops receiving but lets the batch in hand
//! finish.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::server::ServerState;
use crate::observability::metrics;
use crate::provider::{MessageQueue, QueueError, QueueMessage};
use crate::runtime::error_policy::{handle_processing_error, handle_receive_error};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Handles one queue message
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Stage name used in logs and metric labels
    fn stage(&self) -> &'static str;

    /// Process a message. An error leaves the message on the queue.
    async fn process(&self, message: &QueueMessage) -> anyhow::Result<()>;
}

/// Counts for one receive-and-process cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub acknowledged: usize,
    pub failed: usize,
}

impl PollSummary {
    fn add(&mut self, other: PollSummary) {
        self.received += other.received;
        self.acknowledged += other.acknowledged;
        self.failed += other.failed;
    }
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    processor: Arc<dyn MessageProcessor>,
    max_messages: i32,
    wait_time_seconds: i32,
    backoff_min_secs: u64,
    backoff_max_secs: u64,
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue", &self.queue.name())
            .field("stage", &self.processor.stage())
            .field("max_messages", &self.max_messages)
            .field("wait_time_seconds", &self.wait_time_seconds)
            .finish_non_exhaustive()
    }
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        processor: Arc<dyn MessageProcessor>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            max_messages: config.queue_max_messages,
            wait_time_seconds: config.queue_wait_time_seconds,
            backoff_min_secs: config.receive_backoff_min_secs,
            backoff_max_secs: config.receive_backoff_max_secs,
        }
    }

    #[must_use]
    pub fn stage(&self) -> &'static str {
        self.processor.stage()
    }

    /// Receive one batch and process it
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the receive call fails. Processing and
    /// delete failures are counted in the summary instead.
    pub async fn poll_once(&self) -> Result<PollSummary, QueueError> {
        let messages = self
            .queue
            .receive(self.max_messages, self.wait_time_seconds)
            .await?;
        Ok(self.process_batch(messages).await)
    }

    async fn process_batch(&self, messages: Vec<QueueMessage>) -> PollSummary {
        let stage = self.stage();
        let mut summary = PollSummary {
            received: messages.len(),
            ..PollSummary::default()
        };

        for message in messages {
            let span = info_span!(
                "queue.message",
                stage = stage,
                queue = %self.queue.name(),
                message.id = %message.message_id
            );
            let acknowledged = async {
                debug!("Processing message");
                if let Err(e) = self.processor.process(&message).await {
                    handle_processing_error(stage, &message, &e);
                    return false;
                }
                match self.queue.delete(&message.receipt_handle).await {
                    Ok(()) => {
                        metrics::increment_queue_messages_processed(stage);
                        true
                    }
                    Err(e) => {
                        // Processing is idempotent, redelivery only repeats it
                        warn!("Processed message could not be deleted: {}", e);
                        metrics::increment_queue_messages_failed(stage);
                        false
                    }
                }
            }
            .instrument(span)
            .await;

            if acknowledged {
                summary.acknowledged += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Consume until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let stage = self.stage();
        let mut backoff = FibonacciBackoff::new(self.backoff_min_secs, self.backoff_max_secs);
        info!(stage = stage, queue = %self.queue.name(), "Starting queue consumer");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.queue.receive(self.max_messages, self.wait_time_seconds) => received,
            };

            match received {
                Ok(messages) => {
                    backoff.reset();
                    if !messages.is_empty() {
                        let summary = self.process_batch(messages).await;
                        debug!(
                            stage = stage,
                            received = summary.received,
                            acknowledged = summary.acknowledged,
                            failed = summary.failed,
                            "Batch processed"
                        );
                    }
                }
                Err(e) => {
                    let delay = handle_receive_error(stage, &e, &mut backoff);
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(stage = stage, "Queue consumer stopped");
    }
}

/// Run every consumer until shutdown
pub async fn run_consumers(consumers: &[QueueConsumer], shutdown: watch::Receiver<bool>) {
    futures::future::join_all(
        consumers
            .iter()
            .map(|consumer| consumer.run(shutdown.clone())),
    )
    .await;
}

/// Poll every consumer once, in order, and return the combined summary
///
/// # Errors
///
/// Returns the first receive failure.
pub async fn run_once(consumers: &[QueueConsumer]) -> Result<PollSummary, QueueError> {
    let mut total = PollSummary::default();
    for consumer in consumers {
        let summary = consumer.poll_once().await?;
        info!(
            stage = consumer.stage(),
            received = summary.received,
            acknowledged = summary.acknowledged,
            failed = summary.failed,
            "Single poll finished"
        );
        total.add(summary);
    }
    Ok(total)
}

/// Install the stop-signal handlers and return a future resolving to the
/// name of the first signal received
///
/// On Unix both SIGTERM (sent by ECS and Kubernetes) and SIGINT stop the
/// controller; elsewhere Ctrl-C does. Handlers are installed before this
/// returns, so a signal arriving before the future is first polled is not lost.
///
/// # Errors
///
/// Fails when a signal handler cannot be installed.
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str> + Send + 'static> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        Ok(async move {
            tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
            }
        })
    }

    #[cfg(not(unix))]
    {
        Ok(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // Keep waiting so consumers are not told to stop
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                futures::future::pending::<()>().await;
            }
            "Ctrl-C"
        })
    }
}

/// Mark the server not ready and tell the consumers to stop once `signal`
/// resolves
pub fn spawn_shutdown_listener<S>(server_state: Arc<ServerState>, signal: S) -> watch::Receiver<bool>
where
    S: Future<Output = &'static str> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let received = signal.await;
        info!("Received {}, initiating graceful shutdown...", received);
        server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight messages to complete...");
        if shutdown_tx.send(true).is_err() {
            debug!("All queue consumers already stopped");
        }
    });
    shutdown_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::InMemoryQueue;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails messages whose body is "fail", records the rest
    #[derive(Debug, Default)]
    struct RecordingProcessor {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageProcessor for RecordingProcessor {
        fn stage(&self) -> &'static str {
            "test"
        }

        async fn process(&self, message: &QueueMessage) -> anyhow::Result<()> {
            if message.body == "fail" {
                anyhow::bail!("scripted processing failure");
            }
            self.seen.lock().unwrap().push(message.body.clone());
            Ok(())
        }
    }

    fn consumer(queue: &Arc<InMemoryQueue>, processor: &Arc<RecordingProcessor>) -> QueueConsumer {
        let config = ControllerConfig {
            queue_max_messages: 10,
            ..ControllerConfig::default()
        };
        QueueConsumer::new(
            Arc::clone(queue) as Arc<dyn MessageQueue>,
            Arc::clone(processor) as Arc<dyn MessageProcessor>,
            &config,
        )
    }

    #[tokio::test]
    async fn test_only_successful_messages_are_deleted() {
        let queue = Arc::new(InMemoryQueue::new("changes"));
        let processor = Arc::new(RecordingProcessor::default());
        queue.push("ok-1", HashMap::new());
        queue.push("fail", HashMap::new());
        queue.push("ok-2", HashMap::new());

        let summary = consumer(&queue, &processor).poll_once().await.unwrap();

        assert_eq!(
            summary,
            PollSummary {
                received: 3,
                acknowledged: 2,
                failed: 1
            }
        );
        assert_eq!(queue.deleted_count(), 2);
        assert_eq!(queue.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_message_is_redelivered() {
        let queue = Arc::new(InMemoryQueue::new("changes"));
        let processor = Arc::new(RecordingProcessor::default());
        queue.push("fail", HashMap::new());
        let consumer = consumer(&queue, &processor);

        consumer.poll_once().await.unwrap();
        queue.requeue_in_flight();
        let summary = consumer.poll_once().await.unwrap();

        assert_eq!(summary.received, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_receive_error_is_returned_from_poll_once() {
        let queue = Arc::new(InMemoryQueue::new("changes"));
        let processor = Arc::new(RecordingProcessor::default());
        queue.fail_next_receives(1);

        let result = consumer(&queue, &processor).poll_once().await;

        assert!(matches!(result, Err(QueueError::Receive { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::new("changes"));
        let processor = Arc::new(RecordingProcessor::default());
        queue.push("ok-1", HashMap::new());
        queue.fail_next_receives(1);
        let consumer = Arc::new(consumer(&queue, &processor));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run(shutdown_rx).await }
        });

        // Past the first receive backoff
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*processor.seen.lock().unwrap(), vec!["ok-1".to_string()]);
        assert_eq!(queue.deleted_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_listener_marks_not_ready() {
        let server_state = Arc::new(ServerState::default());
        server_state.set_ready(true);
        let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();

        let mut shutdown_rx = spawn_shutdown_listener(Arc::clone(&server_state), async move {
            let _ = signal_rx.await;
            "SIGTERM"
        });
        assert!(!*shutdown_rx.borrow());
        signal_tx.send(()).unwrap();
        shutdown_rx.changed().await.unwrap();

        assert!(*shutdown_rx.borrow());
        assert!(!server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let server_state = Arc::new(ServerState::default());
        server_state.set_ready(true);
        let signal = shutdown_signal().unwrap();
        let mut shutdown_rx = spawn_shutdown_listener(Arc::clone(&server_state), signal);

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown_rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed));
    }
}
