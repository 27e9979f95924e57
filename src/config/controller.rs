//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::controller::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, read-only configuration handed to every stage
pub type SharedControllerConfig = Arc<ControllerConfig>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("RETRY_COUNT must be at least 1")]
    ZeroRetryCount,
    #[error("policy definition and target list file names must differ (both are '{0}')")]
    FileNamesCollide(String),
    #[error("ARCHIVE_EXTENSION must not contain a dot (got '{0}')")]
    DottedArchiveExtension(String),
    #[error("{0} is required for the {1} stage")]
    MissingQueueUrl(&'static str, &'static str),
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name of the policy definition document inside `<policy_name>/`
    pub policy_definition_file_name: String,
    /// Name of the target list document inside `<policy_name>/`
    pub target_list_file_name: String,
    /// Description submitted with every create/update call
    pub policy_description: String,
    /// Organizations policy type the controller manages
    pub policy_type: String,
    /// Extension of uploaded bundles, without the dot
    pub archive_extension: String,
    /// FIFO queue carrying change events to the reconcile stage
    pub queue_url: Option<String>,
    /// Queue receiving S3 event notifications for the ingest stage
    pub ingest_queue_url: Option<String>,
    /// Region for every AWS client; the SDK's default chain applies when unset
    pub aws_region: Option<String>,
    /// Attempts per control-plane call
    pub retry_count: u32,
    /// Sleep before every control-plane attempt (seconds)
    pub sleep_time_seconds: u64,
    /// SQS long-poll wait (seconds)
    pub queue_wait_time_seconds: i32,
    /// Messages per receive call
    pub queue_max_messages: i32,
    /// Backoff bounds after a failed receive (seconds)
    pub receive_backoff_min_secs: u64,
    pub receive_backoff_max_secs: u64,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Enable metrics collection
    pub enable_metrics: bool,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE), used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unparseable numeric values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        use crate::constants::*;
        Self {
            policy_definition_file_name: string_or(
                &lookup,
                "POLICY_DEFINITION_FILE_NAME",
                DEFAULT_POLICY_DEFINITION_FILE_NAME,
            ),
            target_list_file_name: string_or(
                &lookup,
                "TARGET_LIST_FILE_NAME",
                DEFAULT_TARGET_LIST_FILE_NAME,
            ),
            policy_description: string_or(
                &lookup,
                "BACKUP_POLICY_DESCRIPTION",
                DEFAULT_POLICY_DESCRIPTION,
            ),
            policy_type: string_or(&lookup, "POLICY_TYPE", DEFAULT_POLICY_TYPE),
            archive_extension: string_or(&lookup, "ARCHIVE_EXTENSION", DEFAULT_ARCHIVE_EXTENSION),
            queue_url: lookup("SQS_QUEUE_URL").filter(|v| !v.is_empty()),
            ingest_queue_url: lookup("INGEST_QUEUE_URL").filter(|v| !v.is_empty()),
            aws_region: lookup("AWS_REGION").filter(|v| !v.is_empty()),
            retry_count: parsed_or(&lookup, "RETRY_COUNT", DEFAULT_RETRY_COUNT),
            sleep_time_seconds: parsed_or(&lookup, "SLEEP_TIME_SECONDS", DEFAULT_SLEEP_TIME_SECONDS),
            queue_wait_time_seconds: parsed_or(
                &lookup,
                "QUEUE_WAIT_TIME_SECONDS",
                DEFAULT_QUEUE_WAIT_TIME_SECONDS,
            ),
            queue_max_messages: parsed_or(
                &lookup,
                "QUEUE_MAX_MESSAGES",
                DEFAULT_QUEUE_MAX_MESSAGES,
            ),
            receive_backoff_min_secs: parsed_or(
                &lookup,
                "VISIBILITY_BACKOFF_MIN_SECS",
                DEFAULT_RECEIVE_BACKOFF_MIN_SECS,
            ),
            receive_backoff_max_secs: parsed_or(
                &lookup,
                "VISIBILITY_BACKOFF_MAX_SECS",
                DEFAULT_RECEIVE_BACKOFF_MAX_SECS,
            ),
            metrics_port: parsed_or(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            enable_metrics: bool_or(&lookup, "ENABLE_METRICS", true),
            log_level: string_or(&lookup, "LOG_LEVEL", "INFO"),
            log_format: string_or(&lookup, "LOG_FORMAT", "json"),
        }
    }

    /// Validate settings shared by every stage
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy_definition_file_name.is_empty() {
            return Err(ConfigError::Empty("POLICY_DEFINITION_FILE_NAME"));
        }
        if self.target_list_file_name.is_empty() {
            return Err(ConfigError::Empty("TARGET_LIST_FILE_NAME"));
        }
        if self.policy_type.is_empty() {
            return Err(ConfigError::Empty("POLICY_TYPE"));
        }
        if self.policy_definition_file_name == self.target_list_file_name {
            return Err(ConfigError::FileNamesCollide(
                self.target_list_file_name.clone(),
            ));
        }
        if self.retry_count == 0 {
            return Err(ConfigError::ZeroRetryCount);
        }
        if self.archive_extension.is_empty() {
            return Err(ConfigError::Empty("ARCHIVE_EXTENSION"));
        }
        if self.archive_extension.contains('.') {
            return Err(ConfigError::DottedArchiveExtension(
                self.archive_extension.clone(),
            ));
        }
        Ok(())
    }

    /// Change-event queue URL, required by both stages
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingQueueUrl`] when `SQS_QUEUE_URL` is unset.
    pub fn require_queue_url(&self, stage: &'static str) -> Result<&str, ConfigError> {
        self.queue_url
            .as_deref()
            .ok_or(ConfigError::MissingQueueUrl("SQS_QUEUE_URL", stage))
    }

    /// Notification queue URL, required by the ingest stage
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingQueueUrl`] when `INGEST_QUEUE_URL` is unset.
    pub fn require_ingest_queue_url(&self) -> Result<&str, ConfigError> {
        self.ingest_queue_url
            .as_deref()
            .ok_or(ConfigError::MissingQueueUrl("INGEST_QUEUE_URL", "ingest"))
    }

    /// Retry policy applied to every control-plane call
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_count, self.sleep_interval())
    }

    /// Sleep before every control-plane attempt
    #[must_use]
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_time_seconds)
    }

    /// Key of a policy's definition document
    #[must_use]
    pub fn definition_key(&self, policy_name: &str) -> String {
        format!("{policy_name}/{}", self.policy_definition_file_name)
    }

    /// Key of a policy's target list document
    #[must_use]
    pub fn target_list_key(&self, policy_name: &str) -> String {
        format!("{policy_name}/{}", self.target_list_file_name)
    }

    /// Suffix (including the dot) identifying uploaded bundles
    #[must_use]
    pub fn archive_suffix(&self) -> String {
        format!(".{}", self.archive_extension)
    }
}

/// Read a value or return default
fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a value as boolean or return default
fn bool_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read a value as string or return default
fn string_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}
