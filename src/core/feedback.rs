//! Feedback path: persists decisions and outcomes and feeds execution
//! records back into the energy profiles.

use std::sync::Arc;

use tracing::{error, info};

use crate::core::error::HistoryError;
use crate::core::history::{ExecutionSummary, HistoryStore};
use crate::core::model::{Decision, ExecutionRecord};
use crate::core::uncertainty::EnergyProfileStore;
use crate::util::RequestId;

/// Decisions and execution records recorded for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestTrail {
    /// Decisions, oldest first.
    pub decisions: Vec<Decision>,
    /// Execution records, oldest first.
    pub executions: Vec<ExecutionRecord>,
}

/// Sole writer of energy profiles and of the history store.
pub struct FeedbackLoop<H> {
    profiles: Arc<EnergyProfileStore>,
    history: Arc<H>,
}

impl<H: HistoryStore> FeedbackLoop<H> {
    /// Tie a profile store to a history store.
    pub const fn new(profiles: Arc<EnergyProfileStore>, history: Arc<H>) -> Self {
        Self { profiles, history }
    }

    /// Profile store fed by this loop.
    pub const fn profiles(&self) -> &Arc<EnergyProfileStore> {
        &self.profiles
    }

    /// Underlying history store.
    pub const fn history(&self) -> &Arc<H> {
        &self.history
    }

    /// Rebuild every profile from persisted execution history. Returns the
    /// number of records replayed.
    pub fn bootstrap(&self) -> Result<usize, HistoryError> {
        let records = self.history.all_executions()?;
        let applied = self.profiles.rebuild(&records);
        info!(
            records = applied,
            profiles = self.profiles.len(),
            "energy profiles rebuilt from history"
        );
        Ok(applied)
    }

    /// Persist a decision. A failed write is logged and does not affect the decision.
    pub fn record_decision(&self, decision: &Decision) {
        if let Err(err) = self.history.append_decision(decision) {
            error!(
                request_id = %decision.request_id,
                decision_id = %decision.decision_id,
                error = %err,
                "failed to persist decision"
            );
        }
    }

    /// Persist an execution record, then fold it into its profile. A record
    /// that fails to persist leaves the profile untouched, so profiles always
    /// match what [`Self::bootstrap`] would rebuild.
    pub fn record_execution(&self, record: &ExecutionRecord) -> Result<(), HistoryError> {
        self.history.append_execution(record)?;
        self.profiles
            .update(&record.fingerprint, record.energy_joules);
        Ok(())
    }

    /// Everything recorded for one request.
    pub fn trail(&self, request_id: &RequestId) -> Result<RequestTrail, HistoryError> {
        Ok(RequestTrail {
            decisions: self.history.decisions_for(request_id)?,
            executions: self.history.executions_for(request_id)?,
        })
    }

    /// Aggregate statistics over all persisted executions.
    pub fn summary(&self) -> Result<ExecutionSummary, HistoryError> {
        let records = self.history.all_executions()?;
        Ok(ExecutionSummary::from_records(&records))
    }
}
