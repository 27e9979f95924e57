//! # Logging
//!
//! Installs the global `tracing` subscriber.
//!
//! `RUST_LOG` wins when set. Otherwise `LOG_LEVEL` applies to this crate and
//! everything else (AWS SDK internals included) stays at `warn`.

use crate::config::ControllerConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG` or the configured level
#[must_use]
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)))
}

fn default_directive(log_level: &str) -> String {
    let level = match log_level.to_ascii_lowercase().as_str() {
        level @ ("error" | "warn" | "info" | "debug" | "trace") => level.to_string(),
        _ => "info".to_string(),
    };
    format!("warn,backup_policy_controller={level}")
}

/// Initialize the tracing subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &ControllerConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(&config.log_level));

    let result = if config.log_format.eq_ignore_ascii_case("text") {
        builder.with_target(true).try_init()
    } else {
        builder.json().with_current_span(true).try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize tracing subscriber: {e}"))
}
