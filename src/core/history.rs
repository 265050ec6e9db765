//! History store boundary and execution statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::HistoryError;
use crate::core::model::{Decision, ExecutionRecord};
use crate::util::{RequestId, Strategy};

/// Append-only store of decisions and execution records.
///
/// Implementations synchronize internally so one store can be shared behind
/// an `Arc` by the scheduler and the feedback path.
pub trait HistoryStore: Send + Sync + 'static {
    /// Append a decision.
    fn append_decision(&self, decision: &Decision) -> Result<(), HistoryError>;
    /// Append an execution record.
    fn append_execution(&self, record: &ExecutionRecord) -> Result<(), HistoryError>;
    /// Decisions for one request, oldest first.
    fn decisions_for(&self, request_id: &RequestId) -> Result<Vec<Decision>, HistoryError>;
    /// Execution records for one request, oldest first.
    fn executions_for(&self, request_id: &RequestId)
        -> Result<Vec<ExecutionRecord>, HistoryError>;
    /// Every execution record, oldest first. Used to rebuild energy profiles.
    fn all_executions(&self) -> Result<Vec<ExecutionRecord>, HistoryError>;
}

/// Aggregate statistics over execution records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Number of executions.
    pub executions: usize,
    /// Total energy (J).
    pub total_energy_joules: f64,
    /// Total emissions (g CO2eq).
    pub total_carbon_grams: f64,
    /// Mean wall time (ms).
    pub mean_duration_ms: f64,
    /// Executions per strategy.
    pub by_strategy: BTreeMap<Strategy, usize>,
}

impl ExecutionSummary {
    /// Summarize a set of records.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ExecutionRecord>,
    {
        let mut summary = Self::default();
        let mut total_duration = 0u128;
        for record in records {
            summary.executions += 1;
            summary.total_energy_joules += record.energy_joules;
            summary.total_carbon_grams += record.carbon_grams();
            total_duration += u128::from(record.duration_ms);
            *summary.by_strategy.entry(record.strategy).or_default() += 1;
        }
        if summary.executions > 0 {
            summary.mean_duration_ms = total_duration as f64 / summary.executions as f64;
        }
        summary
    }
}
