//! # Ingest Integration Tests
//!
//! Bundle uploads flowing through the ingest stage and on into the
//! reconcile stage via the change-event queue.

mod common;

use backup_policy_controller::controller::event::{parse_notification, ChangeAction, ChangeEvent};
use backup_policy_controller::controller::reconciler::PolicyAction;
use backup_policy_controller::ingest::IngestOutcome;
use backup_policy_controller::runtime::watch_loop::{run_once, PollSummary};
use backup_policy_controller::runtime::Stage;
use common::{bundle, notification, target_list, Harness, BUCKET};
use std::collections::{HashMap, HashSet};

#[tokio::test]
async fn test_region1_bundle_upload() {
    let h = Harness::new();
    let targets = target_list(&["ou-a"]);
    h.store.insert(
        BUCKET,
        "region1.zip",
        bundle(&[
            ("policy_definition.json", r#"{"plans":{"daily":{}}}"#),
            ("target_list.json", targets.as_str()),
        ]),
    );
    let records = parse_notification(&notification("ObjectCreated:Put", "region1.zip")).unwrap();

    let outcome = h.pipeline().handle_notification(&records[0]).await.unwrap();

    assert_eq!(
        outcome,
        IngestOutcome::Extracted {
            policy_name: "region1".to_string(),
            objects: vec![
                "region1/policy_definition.json".to_string(),
                "region1/target_list.json".to_string()
            ],
        }
    );
    assert_eq!(
        h.store.keys(BUCKET),
        vec![
            "region1/policy_definition.json".to_string(),
            "region1/target_list.json".to_string()
        ]
    );

    let sent = h.change_queue.sent();
    assert_eq!(sent.len(), 1);
    let event = ChangeEvent::from_attributes(&sent[0].attributes).unwrap();
    assert_eq!(event.action, ChangeAction::Upload);
    assert_eq!(event.object_path, "region1");
    assert_eq!(event.bucket, BUCKET);
    assert_eq!(sent[0].body, format!("S3 Object region1 uploaded to {BUCKET}"));
}

#[tokio::test]
async fn test_each_event_gets_its_own_group_id() {
    let h = Harness::new();
    let pipeline = h.pipeline();
    for key in ["region1/target_list.json", "region2/target_list.json"] {
        let records = parse_notification(&notification("ObjectRemoved:Delete", key)).unwrap();
        pipeline.handle_notification(&records[0]).await.unwrap();
    }

    let group_ids: HashSet<_> = h
        .change_queue
        .sent()
        .into_iter()
        .map(|message| message.group_id)
        .collect();
    assert_eq!(group_ids.len(), 2);
}

#[tokio::test]
async fn test_failed_commit_keeps_archive_and_publishes_nothing() {
    let h = Harness::new();
    h.store.insert(
        BUCKET,
        "region1.zip",
        bundle(&[("policy_definition.json", "{}")]),
    );
    h.store.fail_deletes(true);
    h.ingest_queue
        .push(notification("ObjectCreated:Put", "region1.zip"), HashMap::new());
    let consumers = h.consumers(Stage::Ingest);

    let summary = run_once(&consumers).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(h.store.contains(BUCKET, "region1.zip"));
    assert!(h.change_queue.sent().is_empty());
    // Left for redelivery
    assert_eq!(h.ingest_queue.in_flight_count(), 1);
}

#[tokio::test]
async fn test_unreadable_extracted_object_keeps_archive() {
    let h = Harness::new();
    let targets = target_list(&["ou-a"]);
    h.store.insert(
        BUCKET,
        "region1.zip",
        bundle(&[
            ("policy_definition.json", "{}"),
            ("target_list.json", targets.as_str()),
        ]),
    );
    h.store.fail_reads_of("region1/target_list.json");
    h.ingest_queue
        .push(notification("ObjectCreated:Put", "region1.zip"), HashMap::new());
    let consumers = h.consumers(Stage::All);

    let summary = run_once(&consumers).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(h.store.contains(BUCKET, "region1/target_list.json"));
    assert!(h.store.contains(BUCKET, "region1.zip"));
    assert!(h.change_queue.sent().is_empty());
    assert_eq!(h.control_plane.policy_count(), 0);
    assert_eq!(h.ingest_queue.in_flight_count(), 1);
}

#[tokio::test]
async fn test_bundle_upload_reconciles_end_to_end() {
    let h = Harness::new();
    let targets = target_list(&["ou-a", "ou-b"]);
    h.store.insert(
        BUCKET,
        "region1.zip",
        bundle(&[
            ("region1/policy_definition.json", r#"{"plans":{}}"#),
            ("region1/target_list.json", targets.as_str()),
        ]),
    );
    h.ingest_queue
        .push(notification("ObjectCreated:Put", "region1.zip"), HashMap::new());
    let consumers = h.consumers(Stage::All);

    let summary = run_once(&consumers).await.unwrap();

    assert_eq!(
        summary,
        PollSummary {
            received: 2,
            acknowledged: 2,
            failed: 0
        }
    );
    let policy_id = h.control_plane.policy_id("region1").unwrap();
    assert_eq!(
        h.attached(&policy_id),
        vec!["ou-a".to_string(), "ou-b".to_string()]
    );
    assert!(!h.store.contains(BUCKET, "region1.zip"));
    assert_eq!(h.ingest_queue.deleted_count(), 1);
    assert_eq!(h.change_queue.deleted_count(), 1);
}

#[tokio::test]
async fn test_target_list_removal_end_to_end() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &["ou-a", "ou-b"]);
    h.put_definition("region1", "{}");
    // Object already gone from the bucket
    h.ingest_queue.push(
        notification("ObjectRemoved:Delete", "region1/target_list.json"),
        HashMap::new(),
    );
    let consumers = h.consumers(Stage::All);

    run_once(&consumers).await.unwrap();

    assert!(h.attached(&policy_id).is_empty());
    assert_eq!(h.control_plane.policy_count(), 1);
}

#[tokio::test]
async fn test_definition_removal_end_to_end() {
    let h = Harness::new();
    h.seed_policy("region1", &["ou-a"]);
    h.ingest_queue.push(
        notification("ObjectRemoved:Delete", "region1/policy_definition.json"),
        HashMap::new(),
    );
    let consumers = h.consumers(Stage::All);

    run_once(&consumers).await.unwrap();

    assert_eq!(h.control_plane.policy_count(), 0);
}

#[tokio::test]
async fn test_upload_event_drives_policy_creation() {
    let h = Harness::new();
    h.put_definition("region1", r#"{"plans":{}}"#);

    let report = h
        .handler()
        .handle(&ChangeEvent::upload(BUCKET, "region1"))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(report.policy_action, PolicyAction::Created(_)));
}
