//! Tests for the intake API and the control loop

use std::time::Duration;

use carbon_aware_scheduler::runtime::api::{health, status_of, SubmitOutcome};
use carbon_aware_scheduler::runtime::{spawn_control_loop, submit_request, SubmitRequest};
use carbon_aware_scheduler::core::RequestStatus;
use carbon_aware_scheduler::util::{RequestId, Strategy, Urgency};

use crate::support::{test_config, Harness, RecordingExecutor, ScriptedGateway};

fn submission(id: &str) -> SubmitRequest {
    SubmitRequest {
        request_id: Some(id.into()),
        fingerprint: "fp-report".into(),
        urgency: Urgency::Normal,
        deadline_ms: None,
        region: "eu-west".into(),
    }
}

#[tokio::test]
async fn test_submit_request_reports_deferral() {
    let h = Harness::new(100.0, ScriptedGateway::new(300.0, 10.0), RecordingExecutor::new());
    let response = submit_request(h.scheduler.as_ref(), submission("api-1"), h.now())
        .await
        .unwrap();
    assert_eq!(response.outcome, SubmitOutcome::Deferred);
    assert_eq!(response.next_check_ms, Some(h.now() + 60_000));
    assert_eq!(health(h.scheduler.as_ref()).pending, 1);

    let status = status_of(h.scheduler.as_ref(), "api-1".into());
    assert!(matches!(status.status, Some(RequestStatus::Deferred { .. })));
    assert!(status_of(h.scheduler.as_ref(), "missing".into()).status.is_none());
}

#[tokio::test]
async fn test_submit_request_reports_execution() {
    let h = Harness::new(100.0, ScriptedGateway::new(50.0, 10.0), RecordingExecutor::new());
    let response = submit_request(h.scheduler.as_ref(), submission("api-2"), h.now())
        .await
        .unwrap();
    assert_eq!(response.outcome, SubmitOutcome::Executed);
    assert_eq!(response.strategy, Some(Strategy::Efficient));
}

#[test]
fn test_submission_generates_id_and_keeps_deadline() {
    let payload: SubmitRequest = serde_json::from_str(
        r#"{ "fingerprint": "fp", "region": "us-east", "deadline_ms": 99 }"#,
    )
    .unwrap();
    let request = payload.into_work_request(10);
    assert!(!request.id.as_str().is_empty());
    assert_eq!(request.urgency, Urgency::Normal);
    assert_eq!(request.deadline_ms, Some(99));
    assert_eq!(request.submitted_at_ms, 10);
}

#[tokio::test]
async fn test_control_loop_drives_deferred_work() {
    let h = Harness::new(100.0, ScriptedGateway::new(300.0, 0.0), RecordingExecutor::new());
    let id = RequestId::from("looped");
    h.scheduler
        .submit(h.request("looped", Urgency::Normal))
        .await
        .unwrap();

    let control = spawn_control_loop(h.scheduler.clone(), Duration::from_millis(5));
    h.gateway.set(20.0, 0.0);
    h.advance_secs(60);

    let mut executed = false;
    for _ in 0..200 {
        if matches!(h.scheduler.status(&id), Some(RequestStatus::Executed { .. })) {
            executed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(executed, "control loop should execute the due entry");
    assert!(!control.is_finished());
    control.shutdown().await;
}

#[tokio::test]
async fn test_control_loop_forgets_finished_requests() {
    let mut cfg = test_config(100.0);
    cfg.scheduler.finished_retention_secs = 60;
    let h = Harness::with_config(&cfg, ScriptedGateway::new(20.0, 0.0), RecordingExecutor::new());
    for i in 0..3 {
        h.scheduler
            .submit(h.request(&format!("quick-{i}"), Urgency::Normal))
            .await
            .unwrap();
    }
    assert_eq!(h.scheduler.tracked_count(), 3);

    let control = spawn_control_loop(h.scheduler.clone(), Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.scheduler.tracked_count(), 3, "still within retention");

    h.advance_secs(60);
    let mut drained = false;
    for _ in 0..200 {
        if h.scheduler.tracked_count() == 0 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(drained, "control loop should purge finished requests");
    assert_eq!(h.scheduler.status(&"quick-0".into()), None);
    control.shutdown().await;
}
