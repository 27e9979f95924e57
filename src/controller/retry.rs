//! # Retry Executor
//!
//! Runs a single control-plane call under a bounded retry policy. The same
//! executor guards the ingest stage's archive fetch, scoped to the object store
//! so its outcomes are counted under the object-store metrics.
//!
//! Every attempt, including the first, is preceded by the policy's delay so that
//! Organizations has time to propagate a preceding mutation. A classifier decides
//! what each failure means:
//!
//! - [`Disposition::Satisfied`]: the goal already holds (already attached, not
//!   attached, already deleted). Treated as success.
//! - [`Disposition::Retry`]: try again until the bound is reached.
//! - [`Disposition::Fatal`]: stop now; repeating the request cannot succeed.
//!
//! Exhaustion and fatal failures are reported as [`RetryOutcome::Abandoned`], never
//! as an error. Callers log it and move on to the next target.

use crate::controller::backoff::FibonacciBackoff;
use crate::observability::metrics;
use crate::provider::{ControlPlaneError, ControlPlaneErrorKind};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// What a failure means for the operation being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Satisfied,
    Retry,
    Fatal,
}

/// Delay applied before each attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayStrategy {
    /// Same delay before every attempt
    Fixed(Duration),
    /// Fibonacci sequence in seconds, starting at `min_secs` and capped at `max_secs`
    Fibonacci { min_secs: u64, max_secs: u64 },
}

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: DelayStrategy,
}

impl RetryPolicy {
    #[must_use]
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            delay: DelayStrategy::Fixed(interval),
        }
    }

    /// Policy without delays, for tests and local runs
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    fn delays(&self) -> Delays {
        match &self.delay {
            DelayStrategy::Fixed(interval) => Delays::Fixed(*interval),
            DelayStrategy::Fibonacci { min_secs, max_secs } => {
                Delays::Fibonacci(FibonacciBackoff::new(*min_secs, *max_secs))
            }
        }
    }
}

enum Delays {
    Fixed(Duration),
    Fibonacci(FibonacciBackoff),
}

impl Delays {
    fn next(&mut self) -> Duration {
        match self {
            Delays::Fixed(interval) => *interval,
            Delays::Fibonacci(backoff) => backoff.next_backoff(),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation returned a value
    Completed(T),
    /// The operation failed in a way that proves its goal already holds
    Satisfied,
    /// The operation was given up; the last error is kept for logging
    Abandoned { attempts: u32, last_error: String },
}

impl<T> RetryOutcome<T> {
    /// Completed or satisfied
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, RetryOutcome::Abandoned { .. })
    }

    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            RetryOutcome::Completed(value) => Some(value),
            RetryOutcome::Satisfied | RetryOutcome::Abandoned { .. } => None,
        }
    }
}

/// Service the retried operations are issued against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationScope {
    ControlPlane,
    ObjectStore,
}

impl OperationScope {
    fn record_outcome(self, operation: &str, outcome: &str) {
        match self {
            OperationScope::ControlPlane => {
                metrics::record_control_plane_operation(operation, outcome);
            }
            OperationScope::ObjectStore => metrics::record_object_store_operation(operation, outcome),
        }
    }

    fn record_retry(self, operation: &str) {
        match self {
            OperationScope::ControlPlane => metrics::increment_control_plane_retries(operation),
            OperationScope::ObjectStore => metrics::increment_object_store_retries(operation),
        }
    }
}

/// Executes operations under one retry policy
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    scope: OperationScope,
}

impl RetryExecutor {
    /// Executor for control-plane calls
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            scope: OperationScope::ControlPlane,
        }
    }

    /// Executor for object-store calls
    #[must_use]
    pub fn for_object_store(policy: RetryPolicy) -> Self {
        Self {
            policy,
            scope: OperationScope::ObjectStore,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn scope(&self) -> OperationScope {
        self.scope
    }

    /// Run `operation` until it succeeds, is satisfied, turns fatal, or the
    /// attempt bound is reached.
    pub async fn run<T, E, C, F, Fut>(
        &self,
        operation_name: &'static str,
        classify: C,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        E: Display,
        C: Fn(&E) -> Disposition,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delays = self.policy.delays();
        let mut last_error = String::new();
        let mut attempts = 0;

        while attempts < self.policy.max_attempts {
            attempts += 1;
            let delay = delays.next();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => {
                    debug!(operation = operation_name, attempt = attempts, "operation succeeded");
                    self.scope.record_outcome(operation_name, "success");
                    return RetryOutcome::Completed(value);
                }
                Err(e) => {
                    last_error = e.to_string();
                    match classify(&e) {
                        Disposition::Satisfied => {
                            debug!(
                                operation = operation_name,
                                attempt = attempts,
                                "goal already satisfied: {}",
                                e
                            );
                            self.scope.record_outcome(operation_name, "satisfied");
                            return RetryOutcome::Satisfied;
                        }
                        Disposition::Fatal => {
                            error!(
                                operation = operation_name,
                                attempt = attempts,
                                "giving up, error is not retryable: {}",
                                e
                            );
                            break;
                        }
                        Disposition::Retry => {
                            self.scope.record_retry(operation_name);
                            warn!(
                                operation = operation_name,
                                attempt = attempts,
                                max_attempts = self.policy.max_attempts,
                                "attempt failed: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        self.scope.record_outcome(operation_name, "abandoned");
        error!(
            operation = operation_name,
            attempts = attempts,
            "operation abandoned: {}",
            last_error
        );
        RetryOutcome::Abandoned {
            attempts,
            last_error,
        }
    }
}

/// Classifier for update and list calls: rejected requests and vanished policies are fatal
#[must_use]
pub fn classify_default(error: &ControlPlaneError) -> Disposition {
    match error.kind {
        ControlPlaneErrorKind::Rejected | ControlPlaneErrorKind::PolicyNotFound => {
            Disposition::Fatal
        }
        _ => Disposition::Retry,
    }
}

/// Classifier for create: another run created the same name first
#[must_use]
pub fn classify_create(error: &ControlPlaneError) -> Disposition {
    match error.kind {
        ControlPlaneErrorKind::DuplicatePolicy => Disposition::Satisfied,
        _ => classify_default(error),
    }
}

/// Classifier for attach: already attached is success
#[must_use]
pub fn classify_attach(error: &ControlPlaneError) -> Disposition {
    match error.kind {
        ControlPlaneErrorKind::DuplicateAttachment => Disposition::Satisfied,
        _ => classify_default(error),
    }
}

/// Classifier for detach: not attached is success
#[must_use]
pub fn classify_detach(error: &ControlPlaneError) -> Disposition {
    match error.kind {
        ControlPlaneErrorKind::NotAttached => Disposition::Satisfied,
        _ => classify_default(error),
    }
}

/// Classifier for delete: a missing policy is already deleted
#[must_use]
pub fn classify_delete(error: &ControlPlaneError) -> Disposition {
    match error.kind {
        ControlPlaneErrorKind::PolicyNotFound => Disposition::Satisfied,
        ControlPlaneErrorKind::Rejected => Disposition::Fatal,
        _ => Disposition::Retry,
    }
}
