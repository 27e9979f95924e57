//! # Reconciliation Integration Tests
//!
//! End-to-end reconciler behavior against the in-memory control plane and
//! object store:
//! - Convergence of attachments onto the declared target list
//! - Idempotence of repeated runs
//! - Deletion completeness
//! - Isolation of per-target failures
//! - Delete-mode reads of the target list

mod common;

use backup_policy_controller::controller::event::ChangeEvent;
use backup_policy_controller::controller::reconciler::PolicyAction;
use backup_policy_controller::model::{ProcessingMode, TargetSet};
use backup_policy_controller::provider::ControlPlaneErrorKind;
use backup_policy_controller::runtime::watch_loop::run_once;
use backup_policy_controller::runtime::Stage;
use common::{Harness, BUCKET};

#[tokio::test]
async fn test_declared_ab_attached_bc() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &["B", "C"]);
    h.put_targets("region1", &["A", "B"]);

    let report = h
        .reconciler()
        .reconcile_attachments(BUCKET, "region1", ProcessingMode::Create)
        .await
        .unwrap();

    assert_eq!(
        h.attachment_calls(),
        vec![
            ("AttachPolicy", "A".to_string()),
            ("DetachPolicy", "C".to_string())
        ]
    );
    assert_eq!(report.attached, vec!["A".to_string()]);
    assert_eq!(report.detached, vec!["C".to_string()]);
    assert_eq!(report.already_converged, 1);
    assert_eq!(h.attached(&policy_id), vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn test_convergence_for_many_shapes() {
    let cases: &[(&[&str], &[&str])] = &[
        (&[], &[]),
        (&["A"], &[]),
        (&[], &["A", "B"]),
        (&["A", "B", "C"], &["C", "D"]),
        (&["ou-1", "ou-2", "123456789012"], &["ou-2", "ou-3"]),
    ];

    for (declared, attached) in cases {
        let h = Harness::new();
        let policy_id = h.seed_policy("region1", attached);
        h.put_targets("region1", declared);

        h.reconciler()
            .reconcile_attachments(BUCKET, "region1", ProcessingMode::Create)
            .await
            .unwrap();

        let expected: TargetSet = declared.iter().map(ToString::to_string).collect();
        assert_eq!(
            h.control_plane.attached_targets(&policy_id),
            expected,
            "declared {declared:?}, attached {attached:?}"
        );
    }
}

#[tokio::test]
async fn test_second_run_issues_no_mutations() {
    let h = Harness::new();
    h.put_definition("region1", r#"{"plans":{"daily":{}}}"#);
    h.put_targets("region1", &["A", "B"]);
    let reconciler = h.reconciler();

    reconciler
        .reconcile_policy_object(BUCKET, "region1")
        .await
        .unwrap();
    h.control_plane.clear_calls();

    let report = reconciler
        .reconcile_attachments(BUCKET, "region1", ProcessingMode::Create)
        .await
        .unwrap();

    assert!(h.control_plane.mutations().is_empty());
    assert_eq!(report.already_converged, 2);
}

#[tokio::test]
async fn test_full_upload_creates_and_attaches() {
    let h = Harness::new();
    h.put_definition("region1", r#"{ "plans": { "daily": {} } }"#);
    h.put_targets("region1", &["ou-a", "ou-b", "ou-a"]);

    let report = h
        .reconciler()
        .reconcile_policy_object(BUCKET, "region1")
        .await
        .unwrap();

    let policy_id = h.control_plane.policy_id("region1").unwrap();
    assert_eq!(report.policy_action, PolicyAction::Created(policy_id.clone()));
    assert_eq!(
        h.attached(&policy_id),
        vec!["ou-a".to_string(), "ou-b".to_string()]
    );
    let (content, _) = h.control_plane.policy("region1").unwrap();
    assert_eq!(content, r#"{"plans":{"daily":{}}}"#);
    assert!(!report.is_degraded());
}

#[tokio::test]
async fn test_failed_detach_does_not_block_attach() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &["X"]);
    h.put_targets("region1", &["Y"]);
    h.control_plane
        .fail_target("DetachPolicy", "X", ControlPlaneErrorKind::Throttled, 3);

    let report = h
        .reconciler()
        .reconcile_attachments(BUCKET, "region1", ProcessingMode::Create)
        .await
        .unwrap();

    assert_eq!(report.attached, vec!["Y".to_string()]);
    assert!(report.detached.is_empty());
    assert_eq!(report.degraded, 1);
    assert_eq!(h.attached(&policy_id), vec!["X".to_string(), "Y".to_string()]);
    assert_eq!(h.control_plane.calls_named("DetachPolicy"), 3);
}

#[tokio::test]
async fn test_failed_attach_does_not_block_other_targets() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &[]);
    h.put_targets("region1", &["A", "B", "C"]);
    h.control_plane
        .fail_target("AttachPolicy", "B", ControlPlaneErrorKind::Rejected, 1);

    let report = h
        .reconciler()
        .reconcile_attachments(BUCKET, "region1", ProcessingMode::Create)
        .await
        .unwrap();

    // Rejected is fatal: a single attempt for B
    assert_eq!(report.attached, vec!["A".to_string(), "C".to_string()]);
    assert_eq!(report.degraded, 1);
    assert_eq!(h.attached(&policy_id), vec!["A".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn test_delete_mode_never_reads_target_list() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &["A", "B"]);
    h.put_targets("region1", &["A", "B"]);

    let report = h
        .reconciler()
        .reconcile_attachments(BUCKET, "region1", ProcessingMode::Delete)
        .await
        .unwrap();

    assert_eq!(h.store.get_count(), 0);
    assert_eq!(report.detached, vec!["A".to_string(), "B".to_string()]);
    assert!(h.attached(&policy_id).is_empty());
    // Deleting the target list never deletes the policy
    assert_eq!(h.control_plane.policy_count(), 1);
}

#[tokio::test]
async fn test_deletion_leaves_nothing_behind() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &["A", "B"]);
    let known: TargetSet = ["A", "B"].iter().map(ToString::to_string).collect();

    let report = h
        .reconciler()
        .delete_policy_lifecycle("region1", &known)
        .await;

    assert_eq!(report.policy_action, PolicyAction::Deleted(policy_id.clone()));
    assert!(h.attached(&policy_id).is_empty());
    assert!(h.control_plane.policy_id("region1").is_none());
    assert_eq!(
        h.attachment_calls(),
        vec![
            ("DetachPolicy", "A".to_string()),
            ("DetachPolicy", "B".to_string())
        ]
    );
    // Delete, then a listing confirms the name is gone
    let operations: Vec<_> = h
        .control_plane
        .calls()
        .into_iter()
        .map(|call| call.operation)
        .skip_while(|operation| *operation != "DeletePolicy")
        .collect();
    assert_eq!(operations, vec!["DeletePolicy", "ListPolicies"]);
}

#[tokio::test]
async fn test_definition_deleted_event() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &["A", "B"]);
    h.put_targets("region1", &["A", "B"]);

    let report = h
        .handler()
        .handle(&ChangeEvent::delete(BUCKET, "region1/policy_definition.json"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.policy_action, PolicyAction::Deleted(policy_id));
    assert_eq!(report.detached, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(h.control_plane.policy_count(), 0);
}

#[tokio::test]
async fn test_throttled_listing_recovers() {
    let h = Harness::new();
    h.put_definition("region1", "{}");
    h.control_plane
        .fail_next("ListPolicies", ControlPlaneErrorKind::Throttled, 2);

    let report = h
        .reconciler()
        .reconcile_policy_object(BUCKET, "region1")
        .await
        .unwrap();

    assert!(matches!(report.policy_action, PolicyAction::Created(_)));
    assert_eq!(h.control_plane.policy_count(), 1);
}

#[tokio::test]
async fn test_paginated_policies_resolve() {
    let h = Harness::with_config(backup_policy_controller::config::ControllerConfig {
        sleep_time_seconds: 0,
        ..Default::default()
    });
    for index in 0..45 {
        h.control_plane
            .seed_policy(&format!("filler-{index:02}"), "{}");
    }
    let policy_id = h.seed_policy("region1", &[]);
    h.put_definition("region1", r#"{"plans":{}}"#);

    let report = h
        .reconciler()
        .reconcile_policy_object(BUCKET, "region1")
        .await
        .unwrap();

    assert_eq!(report.policy_action, PolicyAction::Updated(policy_id));
    assert_eq!(h.control_plane.calls_named("CreatePolicy"), 0);
}

#[tokio::test]
async fn test_unlisted_targets_acknowledge_definition_delete_and_keep_policy() {
    let h = Harness::new();
    let policy_id = h.seed_policy("region1", &["A"]);
    h.control_plane
        .fail_next("ListTargetsForPolicy", ControlPlaneErrorKind::Throttled, 3);
    let event = ChangeEvent::delete(BUCKET, "region1/policy_definition.json").to_outbound();
    h.change_queue.push(event.body, event.attributes);
    let consumers = h.consumers(Stage::Reconcile);

    let summary = run_once(&consumers).await.unwrap();

    assert_eq!(summary.acknowledged, 1);
    assert_eq!(h.change_queue.deleted_count(), 1);
    assert_eq!(h.control_plane.policy_id("region1"), Some(policy_id.clone()));
    assert_eq!(h.attached(&policy_id), vec!["A".to_string()]);
}
