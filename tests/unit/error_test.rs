//! Tests for error types

use std::time::Duration;

use carbon_aware_scheduler::core::{ExecutionError, ForecastError, HistoryError, SchedulerError};

#[test]
fn test_already_finished_error() {
    let err = SchedulerError::AlreadyFinished("job-1".into());
    assert_eq!(format!("{}", err), "request job-1 already finished");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_history_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
    let err: SchedulerError = HistoryError::from(io).into();
    assert!(matches!(err, SchedulerError::History(HistoryError::Io(_))));
    assert!(err.to_string().contains("disk gone"));
}

#[test]
fn test_corrupt_history_names_location() {
    let err = HistoryError::Corrupt {
        file: "decisions.jsonl".into(),
        line: 7,
        reason: "expected value".into(),
    };
    assert_eq!(
        format!("{}", err),
        "corrupt history record at decisions.jsonl:7: expected value"
    );
}

#[test]
fn test_timeouts_report_duration() {
    let forecast = ForecastError::Timeout(Duration::from_secs(2));
    assert_eq!(forecast.to_string(), "forecast fetch timed out after 2s");
    let execution = ExecutionError::Timeout(Duration::from_millis(1500));
    assert_eq!(execution.to_string(), "execution timed out after 1.5s");
}
