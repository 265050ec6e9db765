//! In-memory history store.

use parking_lot::Mutex;

use crate::core::error::HistoryError;
use crate::core::history::HistoryStore;
use crate::core::model::{Decision, ExecutionRecord};
use crate::util::RequestId;

/// Simple in-memory history for development/testing. Lost on restart.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    decisions: Mutex<Vec<Decision>>,
    executions: Mutex<Vec<ExecutionRecord>>,
}

impl InMemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with execution records.
    pub fn with_executions(records: Vec<ExecutionRecord>) -> Self {
        Self {
            decisions: Mutex::new(Vec::new()),
            executions: Mutex::new(records),
        }
    }

    /// Number of persisted decisions.
    pub fn decision_count(&self) -> usize {
        self.decisions.lock().len()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append_decision(&self, decision: &Decision) -> Result<(), HistoryError> {
        self.decisions.lock().push(decision.clone());
        Ok(())
    }

    fn append_execution(&self, record: &ExecutionRecord) -> Result<(), HistoryError> {
        self.executions.lock().push(record.clone());
        Ok(())
    }

    fn decisions_for(&self, request_id: &RequestId) -> Result<Vec<Decision>, HistoryError> {
        Ok(self
            .decisions
            .lock()
            .iter()
            .filter(|d| &d.request_id == request_id)
            .cloned()
            .collect())
    }

    fn executions_for(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ExecutionRecord>, HistoryError> {
        Ok(self
            .executions
            .lock()
            .iter()
            .filter(|r| &r.request_id == request_id)
            .cloned()
            .collect())
    }

    fn all_executions(&self) -> Result<Vec<ExecutionRecord>, HistoryError> {
        Ok(self.executions.lock().clone())
    }
}
