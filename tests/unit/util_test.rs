//! Tests for utility types and clocks

use std::time::Duration;

use carbon_aware_scheduler::util::{
    now_ms, Clock, Fingerprint, ManualClock, RequestId, Strategy, SystemClock, Urgency,
};

#[test]
fn test_strategy_efficiency_ordering() {
    assert!(Strategy::Fast < Strategy::Balanced);
    assert!(Strategy::Balanced < Strategy::Efficient);
    assert_eq!(Strategy::Efficient.to_string(), "efficient");
}

#[test]
fn test_urgency_default_and_serde() {
    assert_eq!(Urgency::default(), Urgency::Normal);
    let json = serde_json::to_string(&Urgency::Critical).unwrap();
    assert_eq!(json, "\"critical\"");
}

#[test]
fn test_ids_are_transparent_strings() {
    let id = RequestId::from("job-9");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"job-9\"");
    let fp: Fingerprint = serde_json::from_str("\"abc\"").unwrap();
    assert_eq!(fp.as_str(), "abc");
    assert_ne!(RequestId::generate(), RequestId::generate());
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(1_000);
    assert_eq!(clock.now_ms(), 1_000);
    clock.advance(Duration::from_secs(2));
    assert_eq!(clock.now_ms(), 3_000);
    clock.set(10);
    assert_eq!(clock.now_ms(), 10);
}

#[test]
fn test_system_clock_tracks_wall_time() {
    let before = now_ms();
    let reading = SystemClock.now_ms();
    assert!(reading >= before);
}

#[test]
fn test_init_tracing_is_idempotent() {
    carbon_aware_scheduler::util::init_tracing_with("debug");
    carbon_aware_scheduler::util::init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}
