//! # Initialization
//!
//! Controller startup: logging, configuration, metrics, HTTP server, AWS
//! clients and one queue consumer per stage.

use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::controller::handler::ChangeEventHandler;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::ingest::IngestPipeline;
use crate::observability;
use crate::provider::aws::{load_sdk_config, OrganizationsControlPlane, S3ObjectStore, SqsQueue};
use crate::provider::{ControlPlane, MessageQueue, ObjectStore};
use crate::runtime::watch_loop::QueueConsumer;
use crate::runtime::Stage;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

/// Services the stages talk to
#[derive(Clone)]
pub struct Providers {
    pub control_plane: Arc<dyn ControlPlane>,
    pub store: Arc<dyn ObjectStore>,
    /// Change events: published by ingest, consumed by reconcile
    pub change_queue: Arc<dyn MessageQueue>,
    /// Bucket notifications consumed by ingest
    pub ingest_queue: Option<Arc<dyn MessageQueue>>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("change_queue", &self.change_queue.name())
            .field(
                "ingest_queue",
                &self.ingest_queue.as_ref().map(|queue| queue.name().to_string()),
            )
            .finish_non_exhaustive()
    }
}

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    pub config: SharedControllerConfig,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub consumers: Vec<QueueConsumer>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .field("consumers", &self.consumers)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime for `stage`
///
/// The HTTP server is only started when `serve_http` is set; single-poll
/// runs skip it.
///
/// # Errors
///
/// Fails on invalid configuration, logging or metrics setup errors, or a
/// missing queue URL for the selected stage.
pub async fn initialize(stage: Stage, serve_http: bool) -> Result<InitializationResult> {
    let config = ControllerConfig::from_env();
    observability::init_logging(&config).context("Failed to initialize logging")?;

    info!("Starting Backup Policy Controller (stage: {})", stage);
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    config.validate().context("Invalid controller configuration")?;
    let change_queue_url = config.require_queue_url(stage.as_str())?.to_string();
    let ingest_queue_url = if stage.runs_ingest() {
        Some(config.require_ingest_queue_url()?.to_string())
    } else {
        None
    };
    let config = Arc::new(config);

    if config.enable_metrics {
        observability::register_metrics()?;
    }

    let server_state = Arc::new(ServerState::default());
    if serve_http {
        let server_state_clone = Arc::clone(&server_state);
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, server_state_clone).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let sdk_config = load_sdk_config(config.aws_region.as_deref()).await;
    let providers = Providers {
        control_plane: Arc::new(OrganizationsControlPlane::new(&sdk_config, &config.policy_type)),
        store: Arc::new(S3ObjectStore::new(&sdk_config)),
        change_queue: Arc::new(SqsQueue::new(&sdk_config, change_queue_url)),
        ingest_queue: ingest_queue_url
            .map(|url| Arc::new(SqsQueue::new(&sdk_config, url)) as Arc<dyn MessageQueue>),
    };
    info!(providers = ?providers, "AWS clients ready");

    let consumers = build_consumers(stage, &config, &providers)?;
    info!("Controller initialized with {} queue consumer(s)", consumers.len());

    Ok(InitializationResult {
        config,
        server_state,
        consumers,
    })
}

/// Build the consumers for `stage`, ingest first
///
/// # Errors
///
/// Fails when the ingest stage is selected without an ingest queue.
pub fn build_consumers(
    stage: Stage,
    config: &SharedControllerConfig,
    providers: &Providers,
) -> Result<Vec<QueueConsumer>> {
    let mut consumers = Vec::new();

    if stage.runs_ingest() {
        let ingest_queue = providers
            .ingest_queue
            .clone()
            .context("The ingest stage needs a notification queue")?;
        let pipeline = IngestPipeline::new(
            Arc::clone(&providers.store),
            Arc::clone(&providers.change_queue),
            Arc::clone(config),
        );
        consumers.push(QueueConsumer::new(ingest_queue, Arc::new(pipeline), config));
    }

    if stage.runs_reconcile() {
        let reconciler = Reconciler::new(
            Arc::clone(&providers.control_plane),
            Arc::clone(&providers.store),
            Arc::clone(config),
        );
        let handler = ChangeEventHandler::new(reconciler, Arc::clone(config));
        consumers.push(QueueConsumer::new(
            Arc::clone(&providers.change_queue),
            Arc::new(handler),
            config,
        ));
    }

    Ok(consumers)
}
