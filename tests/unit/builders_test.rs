//! Tests for building a scheduler from configuration

use std::sync::Arc;

use carbon_aware_scheduler::builders::build_scheduler;
use carbon_aware_scheduler::config::EngineConfig;
use carbon_aware_scheduler::core::{ExecutionRecord, HistoryStore};
use carbon_aware_scheduler::infra::InMemoryHistoryStore;
use carbon_aware_scheduler::util::{Clock, ManualClock, Strategy};

use crate::support::{test_config, RecordingExecutor, ScriptedGateway};

#[test]
fn test_build_scheduler_from_config() {
    let cfg = test_config(250.0);
    let scheduler = build_scheduler(
        &cfg,
        ScriptedGateway::new(100.0, 10.0),
        RecordingExecutor::new(),
        Arc::new(InMemoryHistoryStore::new()),
        Arc::new(ManualClock::new(0)) as Arc<dyn Clock>,
    )
    .unwrap();

    assert_eq!(scheduler.selector().threshold(), 250.0);
    assert_eq!(
        scheduler.selector().settings().reevaluation_interval,
        scheduler.settings().base_interval
    );
    assert_eq!(scheduler.settings().max_parallel_evaluations, 4);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn test_build_rejects_invalid_config() {
    let mut cfg = EngineConfig::default();
    cfg.selector.carbon_threshold = 0.0;
    let result = build_scheduler(
        &cfg,
        ScriptedGateway::new(100.0, 10.0),
        RecordingExecutor::new(),
        Arc::new(InMemoryHistoryStore::new()),
        Arc::new(ManualClock::new(0)) as Arc<dyn Clock>,
    );
    let err = result.err().expect("invalid config must fail");
    assert!(err.to_string().contains("config invalid"));
}

#[test]
fn test_build_bootstraps_profiles_from_history() {
    let history = Arc::new(InMemoryHistoryStore::new());
    for energy in [10.0, 11.0, 12.0] {
        history
            .append_execution(&ExecutionRecord {
                request_id: "old".into(),
                fingerprint: "fp-known".into(),
                strategy: Strategy::Fast,
                energy_joules: energy,
                carbon_intensity: 100.0,
                duration_ms: 1,
                executed_at_ms: 1,
            })
            .unwrap();
    }

    let scheduler = build_scheduler(
        &EngineConfig::default(),
        ScriptedGateway::new(100.0, 10.0),
        RecordingExecutor::new(),
        history,
        Arc::new(ManualClock::new(0)) as Arc<dyn Clock>,
    )
    .unwrap();

    let profile = scheduler.profiles().snapshot(&"fp-known".into()).unwrap();
    assert_eq!(profile.count, 3);
}
