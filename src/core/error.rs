//! Error types for engine operations.
//!
//! Most "errors" in the decision path are not errors at all: a missing
//! forecast degrades the decision, thin profile data selects the most
//! conservative strategy, and an expiring deadline forces execution. Those
//! outcomes are recorded on the [`Decision`](crate::core::Decision). The
//! types here cover what actually fails.

use std::time::Duration;

use thiserror::Error;

use crate::util::RequestId;

/// Errors produced by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The request already reached a terminal state and cannot be resubmitted.
    #[error("request {0} already finished")]
    AlreadyFinished(RequestId),
    /// No request with this identifier is known.
    #[error("unknown request: {0}")]
    UnknownRequest(RequestId),
    /// History store failure.
    #[error("history error: {0}")]
    History(#[from] HistoryError),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failures reported by a forecast gateway.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The provider has no forecast for this region or is unreachable.
    #[error("forecast unavailable: {0}")]
    Unavailable(String),
    /// The gateway did not answer within the configured timeout.
    #[error("forecast fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The provider answered with values that cannot be used.
    #[error("invalid forecast: {0}")]
    Invalid(String),
}

/// Failures reported by the executor handoff.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The executor ran the workload and it failed.
    #[error("execution failed: {0}")]
    Failed(String),
    /// The executor did not answer within the configured timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
}

/// Failures of the append-only history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Filesystem failure.
    #[error("history io: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be encoded or decoded.
    #[error("history serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A persisted line could not be parsed.
    #[error("corrupt history record at {file}:{line}: {reason}")]
    Corrupt {
        /// File name of the history stream.
        file: String,
        /// One-based line number.
        line: usize,
        /// Parser message.
        reason: String,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
