//! Tests for the in-memory deferral queue

use carbon_aware_scheduler::core::{DeferralQueue, DeferredEntry, EnqueueOutcome, EntryKind};
use carbon_aware_scheduler::infra::InMemoryDeferralQueue;
use carbon_aware_scheduler::util::Strategy;

fn entry(id: &str, next_check_ms: u128) -> DeferredEntry {
    DeferredEntry {
        request_id: id.into(),
        next_check_ms,
        escalation_count: 0,
        deadline_ms: None,
        kind: EntryKind::Reevaluate,
    }
}

#[test]
fn test_retry_entry_replaces_reevaluation() {
    let mut q = InMemoryDeferralQueue::new();
    q.upsert(entry("a", 100));
    let retry = DeferredEntry {
        kind: EntryKind::RetryExecution {
            strategy: Strategy::Balanced,
            attempt: 1,
        },
        ..entry("a", 50)
    };
    assert_eq!(q.upsert(retry), EnqueueOutcome::Merged);

    let due = q.pop_due(50, 10);
    assert_eq!(due.len(), 1);
    assert!(matches!(due[0].kind, EntryKind::RetryExecution { attempt: 1, .. }));
    assert!(q.pop_due(1_000, 10).is_empty());
}

#[test]
fn test_many_requests_pop_in_time_order() {
    let mut q = InMemoryDeferralQueue::new();
    for i in (0..100u128).rev() {
        q.upsert(entry(&format!("r{i}"), i * 10));
    }
    let due = q.pop_due(u128::MAX, usize::MAX);
    assert_eq!(due.len(), 100);
    assert!(due.windows(2).all(|w| w[0].next_check_ms <= w[1].next_check_ms));
}

#[test]
fn test_next_due_skips_removed_head() {
    let mut q = InMemoryDeferralQueue::new();
    q.upsert(entry("early", 10));
    q.upsert(entry("late", 20));
    q.remove(&"early".into());
    assert_eq!(q.next_due_ms(), Some(20));
    assert_eq!(q.get(&"late".into()).map(|e| e.next_check_ms), Some(20));
}

#[test]
fn test_entry_serializes() {
    let json = serde_json::to_value(entry("a", 5)).unwrap();
    assert_eq!(json["request_id"], "a");
    assert_eq!(json["kind"], "reevaluate");
}
