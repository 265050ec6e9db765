//! Tests for audit sink

use carbon_aware_scheduler::core::{
    build_audit_event, AuditSink, InMemoryAuditSink, LifecycleAction, SharedAuditSink,
};
use carbon_aware_scheduler::util::RequestId;

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let id = RequestId::from("job1");

    let event = build_audit_event(&id, "eu-west", LifecycleAction::Deferred, Some("next check".to_string()));
    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].request_id, id);
    assert_eq!(events[0].region, "eu-west");
    assert_eq!(events[0].action, LifecycleAction::Deferred);
    assert_eq!(events[0].detail.as_deref(), Some("next check"));
    assert!(events[0].event_id.starts_with("job1-deferred-"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let id = RequestId::from("job1");

    sink.record(build_audit_event(&id, "eu", LifecycleAction::Submitted, None));
    sink.record(build_audit_event(&id, "eu", LifecycleAction::Deferred, None));
    sink.record(build_audit_event(&id, "eu", LifecycleAction::Canceled, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, LifecycleAction::Deferred); // First one popped
    assert_eq!(events[1].action, LifecycleAction::Canceled);
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event(&"x".into(), "eu", LifecycleAction::Submitted, None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_shared_sink_clones_see_same_buffer() {
    let reader = SharedAuditSink::new(8);
    let mut writer = reader.clone();
    writer.record(build_audit_event(&"a".into(), "eu", LifecycleAction::Executed, None));
    assert_eq!(reader.actions_for(&"a".into()), vec![LifecycleAction::Executed]);
}

#[test]
fn test_action_serializes_snake_case() {
    let json = serde_json::to_string(&LifecycleAction::RetryScheduled).unwrap();
    assert_eq!(json, "\"retry_scheduled\"");
}
