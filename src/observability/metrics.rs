//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `backup_policy_reconciliations_total` - Total number of reconciliation runs
//! - `backup_policy_reconciliation_errors_total` - Runs that failed and left the message for redelivery
//! - `backup_policy_reconciliation_duration_seconds` - Duration of reconciliation runs
//! - `backup_policy_control_plane_operations_total` - Control-plane calls by operation and outcome
//! - `backup_policy_control_plane_retries_total` - Retried control-plane attempts by operation
//! - `backup_policy_object_store_operations_total` - Retried object-store calls by operation and outcome
//! - `backup_policy_object_store_retries_total` - Retried object-store attempts by operation
//! - `backup_policy_degraded_operations_total` - Sub-operations abandoned or skipped by step
//! - `backup_policy_queue_messages_processed_total` - Queue messages acknowledged by stage
//! - `backup_policy_queue_messages_failed_total` - Queue messages left for redelivery by stage
//! - `backup_policy_queue_receive_errors_total` - Failed receive calls by stage
//! - `backup_policy_events_published_total` - Change events published by action
//! - `backup_policy_archives_extracted_total` - Policy bundles extracted
//! - `backup_policy_ingest_errors_total` - Failed ingest notifications

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "backup_policy_reconciliations_total",
        "Total number of reconciliation runs",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "backup_policy_reconciliation_errors_total",
        "Total number of reconciliation runs that returned an error",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "backup_policy_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CONTROL_PLANE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_control_plane_operations_total",
            "Total number of control-plane operations by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create CONTROL_PLANE_OPERATIONS_TOTAL metric - this should never happen")
});

static CONTROL_PLANE_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_control_plane_retries_total",
            "Total number of retried control-plane attempts by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create CONTROL_PLANE_RETRIES_TOTAL metric - this should never happen")
});

static OBJECT_STORE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_object_store_operations_total",
            "Total number of retried object-store operations by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create OBJECT_STORE_OPERATIONS_TOTAL metric - this should never happen")
});

static OBJECT_STORE_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_object_store_retries_total",
            "Total number of retried object-store attempts by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create OBJECT_STORE_RETRIES_TOTAL metric - this should never happen")
});

static DEGRADED_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_degraded_operations_total",
            "Total number of sub-operations abandoned or skipped by reconciliation step",
        ),
        &["step"],
    )
    .expect("Failed to create DEGRADED_OPERATIONS_TOTAL metric - this should never happen")
});

static QUEUE_MESSAGES_PROCESSED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_queue_messages_processed_total",
            "Total number of queue messages processed and acknowledged by stage",
        ),
        &["stage"],
    )
    .expect("Failed to create QUEUE_MESSAGES_PROCESSED_TOTAL metric - this should never happen")
});

static QUEUE_MESSAGES_FAILED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_queue_messages_failed_total",
            "Total number of queue messages left for redelivery by stage",
        ),
        &["stage"],
    )
    .expect("Failed to create QUEUE_MESSAGES_FAILED_TOTAL metric - this should never happen")
});

static QUEUE_RECEIVE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_queue_receive_errors_total",
            "Total number of failed queue receive calls by stage",
        ),
        &["stage"],
    )
    .expect("Failed to create QUEUE_RECEIVE_ERRORS_TOTAL metric - this should never happen")
});

static EVENTS_PUBLISHED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "backup_policy_events_published_total",
            "Total number of change events published by action",
        ),
        &["action"],
    )
    .expect("Failed to create EVENTS_PUBLISHED_TOTAL metric - this should never happen")
});

static ARCHIVES_EXTRACTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "backup_policy_archives_extracted_total",
        "Total number of policy bundles extracted",
    )
    .expect("Failed to create ARCHIVES_EXTRACTED_TOTAL metric - this should never happen")
});

static INGEST_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "backup_policy_ingest_errors_total",
        "Total number of ingest notifications that failed",
    )
    .expect("Failed to create INGEST_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CONTROL_PLANE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTROL_PLANE_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECT_STORE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECT_STORE_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEGRADED_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_MESSAGES_PROCESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_MESSAGES_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_RECEIVE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARCHIVES_EXTRACTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// Record the final outcome of a control-plane operation
/// (`success`, `satisfied` or `abandoned`)
pub fn record_control_plane_operation(operation: &str, outcome: &str) {
    CONTROL_PLANE_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn increment_control_plane_retries(operation: &str) {
    CONTROL_PLANE_RETRIES_TOTAL
        .with_label_values(&[operation])
        .inc();
}

/// Record the final outcome of a retried object-store operation
pub fn record_object_store_operation(operation: &str, outcome: &str) {
    OBJECT_STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn increment_object_store_retries(operation: &str) {
    OBJECT_STORE_RETRIES_TOTAL
        .with_label_values(&[operation])
        .inc();
}

#[cfg(test)]
pub(crate) fn control_plane_operation_count(operation: &str, outcome: &str) -> u64 {
    CONTROL_PLANE_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .get()
}

#[cfg(test)]
pub(crate) fn object_store_operation_count(operation: &str, outcome: &str) -> u64 {
    OBJECT_STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .get()
}

pub fn increment_degraded_operations(step: &str, count: usize) {
    let count = u64::try_from(count).unwrap_or(u64::MAX);
    DEGRADED_OPERATIONS_TOTAL
        .with_label_values(&[step])
        .inc_by(count);
}

pub fn increment_queue_messages_processed(stage: &str) {
    QUEUE_MESSAGES_PROCESSED_TOTAL
        .with_label_values(&[stage])
        .inc();
}

pub fn increment_queue_messages_failed(stage: &str) {
    QUEUE_MESSAGES_FAILED_TOTAL
        .with_label_values(&[stage])
        .inc();
}

pub fn increment_queue_receive_errors(stage: &str) {
    QUEUE_RECEIVE_ERRORS_TOTAL.with_label_values(&[stage]).inc();
}

pub fn increment_events_published(action: &str) {
    EVENTS_PUBLISHED_TOTAL.with_label_values(&[action]).inc();
}

pub fn increment_archives_extracted() {
    ARCHIVES_EXTRACTED_TOTAL.inc();
}

pub fn increment_ingest_errors() {
    INGEST_ERRORS_TOTAL.inc();
}
