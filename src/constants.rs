//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default name of the policy definition document inside a policy directory
pub const DEFAULT_POLICY_DEFINITION_FILE_NAME: &str = "policy_definition.json";

/// Default name of the target list document inside a policy directory
pub const DEFAULT_TARGET_LIST_FILE_NAME: &str = "target_list.json";

/// Default description attached to every policy the controller creates or updates
pub const DEFAULT_POLICY_DESCRIPTION: &str = "Backup Policy managed by backup-policy-controller.";

/// Organizations policy type managed by the controller
pub const DEFAULT_POLICY_TYPE: &str = "BACKUP_POLICY";

/// Extension (without the dot) of uploaded policy bundles
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "zip";

/// Default number of attempts for a single control-plane call
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default sleep before every control-plane attempt (seconds)
/// Absorbs Organizations propagation delay after a preceding mutation
pub const DEFAULT_SLEEP_TIME_SECONDS: u64 = 5;

/// Default SQS long-poll wait time (seconds). 20 is the SQS maximum.
pub const DEFAULT_QUEUE_WAIT_TIME_SECONDS: i32 = 20;

/// Default number of messages fetched per receive call
pub const DEFAULT_QUEUE_MAX_MESSAGES: i32 = 1;

/// Default minimum backoff after a failed queue receive (seconds)
pub const DEFAULT_RECEIVE_BACKOFF_MIN_SECS: u64 = 1;

/// Default maximum backoff after a failed queue receive (seconds)
pub const DEFAULT_RECEIVE_BACKOFF_MAX_SECS: u64 = 60;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Message attribute carrying the bucket of the changed object
pub const ATTRIBUTE_BUCKET: &str = "Bucket";

/// Message attribute carrying the changed object path (or policy name)
pub const ATTRIBUTE_UPDATED_OBJECT: &str = "UpdatedObject";

/// Message attribute carrying the change action
pub const ATTRIBUTE_ACTION: &str = "Action";
