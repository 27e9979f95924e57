//! Common test utilities for integration tests
//!
//! Wires the controller against the in-memory providers and builds the
//! fixtures (bundles, notifications) the scenarios need.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use backup_policy_controller::config::{ControllerConfig, SharedControllerConfig};
use backup_policy_controller::controller::handler::ChangeEventHandler;
use backup_policy_controller::controller::reconciler::Reconciler;
use backup_policy_controller::ingest::IngestPipeline;
use backup_policy_controller::provider::memory::{
    InMemoryControlPlane, InMemoryObjectStore, InMemoryQueue,
};
use backup_policy_controller::provider::{ControlPlane, MessageQueue, ObjectStore};
use backup_policy_controller::runtime::initialization::{build_consumers, Providers};
use backup_policy_controller::runtime::watch_loop::QueueConsumer;
use backup_policy_controller::runtime::Stage;
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const BUCKET: &str = "backup-policies";

/// In-memory world the controller runs against
pub struct Harness {
    pub control_plane: Arc<InMemoryControlPlane>,
    pub store: Arc<InMemoryObjectStore>,
    pub change_queue: Arc<InMemoryQueue>,
    pub ingest_queue: Arc<InMemoryQueue>,
    pub config: SharedControllerConfig,
}

impl Harness {
    /// No sleeps between attempts, three attempts per call
    pub fn new() -> Self {
        Self::with_config(ControllerConfig {
            sleep_time_seconds: 0,
            queue_wait_time_seconds: 0,
            queue_max_messages: 10,
            ..ControllerConfig::default()
        })
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        Self {
            control_plane: Arc::new(InMemoryControlPlane::new()),
            store: Arc::new(InMemoryObjectStore::new()),
            change_queue: Arc::new(InMemoryQueue::new("changes.fifo")),
            ingest_queue: Arc::new(InMemoryQueue::new("notifications")),
            config: Arc::new(config),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.control_plane) as Arc<dyn ControlPlane>,
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            Arc::clone(&self.config),
        )
    }

    pub fn handler(&self) -> ChangeEventHandler {
        ChangeEventHandler::new(self.reconciler(), Arc::clone(&self.config))
    }

    pub fn pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            Arc::clone(&self.change_queue) as Arc<dyn MessageQueue>,
            Arc::clone(&self.config),
        )
    }

    /// Consumers for `stage`, as the binary builds them
    pub fn consumers(&self, stage: Stage) -> Vec<QueueConsumer> {
        let providers = Providers {
            control_plane: Arc::clone(&self.control_plane) as Arc<dyn ControlPlane>,
            store: Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            change_queue: Arc::clone(&self.change_queue) as Arc<dyn MessageQueue>,
            ingest_queue: Some(Arc::clone(&self.ingest_queue) as Arc<dyn MessageQueue>),
        };
        build_consumers(stage, &self.config, &providers).expect("consumers")
    }

    pub fn put_definition(&self, policy_name: &str, content: &str) {
        self.store
            .insert(BUCKET, &self.config.definition_key(policy_name), content);
    }

    pub fn put_targets(&self, policy_name: &str, targets: &[&str]) {
        self.store.insert(
            BUCKET,
            &self.config.target_list_key(policy_name),
            target_list(targets),
        );
    }

    /// Seed a live policy attached to `targets`
    pub fn seed_policy(&self, policy_name: &str, targets: &[&str]) -> String {
        let policy_id = self.control_plane.seed_policy(policy_name, "{}");
        for target in targets {
            self.control_plane.seed_attachment(&policy_id, target);
        }
        policy_id
    }

    pub fn attached(&self, policy_id: &str) -> Vec<String> {
        self.control_plane
            .attached_targets(policy_id)
            .into_iter()
            .collect()
    }

    /// (operation, target) for every attach/detach issued so far
    pub fn attachment_calls(&self) -> Vec<(&'static str, String)> {
        self.control_plane
            .mutations()
            .into_iter()
            .filter(|call| call.target_id.is_some())
            .map(|call| (call.operation, call.target_id.unwrap_or_default()))
            .collect()
    }
}

pub fn target_list(targets: &[&str]) -> String {
    serde_json::json!({ "targets": targets }).to_string()
}

/// Zip archive with the given (entry name, contents)
pub fn bundle(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(contents.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// S3 event notification body for a single record
pub fn notification(event_name: &str, key: &str) -> String {
    serde_json::json!({
        "Records": [{
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "eventName": event_name,
            "s3": {
                "bucket": { "name": BUCKET },
                "object": { "key": key, "size": 1024 }
            }
        }]
    })
    .to_string()
}
