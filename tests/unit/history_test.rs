//! Tests for history backends and profile rebuilds

use std::path::PathBuf;
use std::sync::Arc;

use carbon_aware_scheduler::builders::open_history;
use carbon_aware_scheduler::config::HistoryBackendConfig;
use carbon_aware_scheduler::core::{
    Decision, EnergyProfileStore, EnergyReliability, ExecutionRecord, ExecutionSummary,
    FeedbackLoop, HistoryStore,
};
use carbon_aware_scheduler::infra::{HistoryBackend, InMemoryHistoryStore, JsonlHistoryStore};
use carbon_aware_scheduler::util::Strategy;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("carbon-history-test-{}", uuid::Uuid::new_v4()))
}

fn record(id: &str, fingerprint: &str, energy: f64, strategy: Strategy) -> ExecutionRecord {
    ExecutionRecord {
        request_id: id.into(),
        fingerprint: fingerprint.into(),
        strategy,
        energy_joules: energy,
        carbon_intensity: 360.0,
        duration_ms: 100,
        executed_at_ms: 1,
    }
}

#[test]
fn test_in_memory_history_filters_by_request() {
    let store = InMemoryHistoryStore::new();
    store.append_execution(&record("a", "fp", 1.0, Strategy::Fast)).unwrap();
    store.append_execution(&record("b", "fp", 2.0, Strategy::Fast)).unwrap();
    store
        .append_decision(&Decision::deadline_guard("a".into(), 100.0, 2, 5))
        .unwrap();

    assert_eq!(store.executions_for(&"a".into()).unwrap().len(), 1);
    assert_eq!(store.decisions_for(&"a".into()).unwrap().len(), 1);
    assert!(store.decisions_for(&"b".into()).unwrap().is_empty());
    assert_eq!(store.all_executions().unwrap().len(), 2);
    assert_eq!(store.decision_count(), 1);
}

#[test]
fn test_jsonl_decisions_round_trip_through_disk() {
    let dir = temp_dir();
    let store = JsonlHistoryStore::open(&dir).unwrap();
    let decision = Decision::deadline_guard("job".into(), 250.0, 3, 1_700_000_000_000);
    store.append_decision(&decision).unwrap();

    let reopened = JsonlHistoryStore::open(&dir).unwrap();
    assert_eq!(reopened.decisions_for(&"job".into()).unwrap(), vec![decision]);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_restart_rebuilds_profiles_from_jsonl() {
    let dir = temp_dir();
    {
        let history = Arc::new(JsonlHistoryStore::open(&dir).unwrap());
        let feedback = FeedbackLoop::new(Arc::new(EnergyProfileStore::new(3)), history);
        for (i, energy) in [90.0, 100.0, 110.0].into_iter().enumerate() {
            feedback
                .record_execution(&record(&format!("r{i}"), "fp-a", energy, Strategy::Balanced))
                .unwrap();
        }
    }

    let history = Arc::new(JsonlHistoryStore::open(&dir).unwrap());
    let profiles = Arc::new(EnergyProfileStore::new(3));
    let feedback = FeedbackLoop::new(Arc::clone(&profiles), history);
    assert_eq!(feedback.bootstrap().unwrap(), 3);

    match profiles.reliability(&"fp-a".into()) {
        EnergyReliability::Known {
            mean, sample_count, ..
        } => {
            assert_eq!(sample_count, 3);
            assert!((mean - 100.0).abs() < 1e-9);
        }
        other => panic!("expected known profile, got {other:?}"),
    }
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_restart_after_crash_mid_append_rebuilds_profiles() {
    use std::io::Write;

    let dir = temp_dir();
    {
        let history = Arc::new(JsonlHistoryStore::open(&dir).unwrap());
        let feedback = FeedbackLoop::new(Arc::new(EnergyProfileStore::new(3)), history);
        feedback
            .record_execution(&record("r0", "fp-a", 90.0, Strategy::Balanced))
            .unwrap();
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.join("executions.jsonl"))
            .unwrap();
        write!(file, "{{\"request_id\":\"r-lost\",\"finger").unwrap();
    }

    {
        let history = Arc::new(JsonlHistoryStore::open(&dir).unwrap());
        let feedback = FeedbackLoop::new(Arc::new(EnergyProfileStore::new(3)), history);
        assert_eq!(feedback.bootstrap().unwrap(), 1);
        for (i, energy) in [100.0, 110.0].into_iter().enumerate() {
            feedback
                .record_execution(&record(&format!("r{}", i + 1), "fp-a", energy, Strategy::Balanced))
                .unwrap();
        }
    }

    let history = Arc::new(JsonlHistoryStore::open(&dir).unwrap());
    let profiles = Arc::new(EnergyProfileStore::new(3));
    let feedback = FeedbackLoop::new(Arc::clone(&profiles), history);
    assert_eq!(feedback.bootstrap().unwrap(), 3);
    assert_eq!(profiles.reliability(&"fp-a".into()).sample_count(), 3);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_open_history_from_config() {
    let memory = open_history(&HistoryBackendConfig::InMemory).unwrap();
    assert!(matches!(memory, HistoryBackend::InMemory(_)));

    let dir = temp_dir();
    let jsonl = open_history(&HistoryBackendConfig::Jsonl { dir: dir.clone() }).unwrap();
    jsonl.append_execution(&record("a", "fp", 5.0, Strategy::Efficient)).unwrap();
    assert!(dir.join("executions.jsonl").exists());
    assert_eq!(jsonl.all_executions().unwrap().len(), 1);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_summary_over_history() {
    let store = Arc::new(InMemoryHistoryStore::with_executions(vec![
        record("a", "fp", 3_600_000.0, Strategy::Fast),
        record("b", "fp", 1_800_000.0, Strategy::Efficient),
    ]));
    let feedback = FeedbackLoop::new(Arc::new(EnergyProfileStore::new(3)), store);
    let summary = feedback.summary().unwrap();
    assert_eq!(summary.executions, 2);
    // 1 kWh + 0.5 kWh at 360 g/kWh
    assert!((summary.total_carbon_grams - 540.0).abs() < 1e-9);
    assert_eq!(summary.by_strategy.len(), 2);
    assert_ne!(summary, ExecutionSummary::default());
}
