//! # Backup Policy Controller
//!
//! Keeps AWS Organizations backup policies in line with the policy
//! directories stored in an S3 bucket.
//!
//! ## Overview
//!
//! The controller runs as two queue-driven stages:
//!
//! 1. **Ingest** - consumes S3 notifications, extracts uploaded `<policy>.zip`
//!    bundles into `<policy>/` and publishes change events
//! 2. **Reconcile** - consumes change events, creates/updates/deletes the
//!    policy and converges its attachments onto the declared target list
//!
//! Both stages can run in one process (`--stage all`, the default) or be
//! deployed separately.
//!
//! ## Usage
//!
//! ```bash
//! # Run both stages until SIGTERM or SIGINT
//! backup-policy-controller
//!
//! # Reconcile only, processing a single batch
//! backup-policy-controller --stage reconcile --once
//! ```

use anyhow::{Context, Result};
use backup_policy_controller::runtime::initialization::initialize;
use backup_policy_controller::runtime::watch_loop::{
    run_consumers, run_once, shutdown_signal, spawn_shutdown_listener,
};
use backup_policy_controller::runtime::Stage;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

/// Backup Policy Controller
#[derive(Parser, Debug)]
#[command(name = "backup-policy-controller", version, about, long_about = None)]
struct Cli {
    /// Pipeline stage(s) to run
    #[arg(long, value_enum, default_value_t = Stage::All)]
    stage: Stage,

    /// Receive and process one batch per stage, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = initialize(cli.stage, !cli.once).await?;

    if cli.once {
        let summary = run_once(&runtime.consumers)
            .await
            .context("Failed to receive messages")?;
        info!(
            received = summary.received,
            acknowledged = summary.acknowledged,
            failed = summary.failed,
            "Single poll complete"
        );
        return Ok(());
    }

    let signal = shutdown_signal().context("Failed to install signal handlers")?;
    let shutdown = spawn_shutdown_listener(Arc::clone(&runtime.server_state), signal);
    runtime.server_state.set_ready(true);
    info!("Controller ready, consuming queues...");

    run_consumers(&runtime.consumers, shutdown).await;

    info!("Controller stopped");
    Ok(())
}
