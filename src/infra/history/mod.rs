//! History store backends.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlHistoryStore;
pub use memory::InMemoryHistoryStore;

use crate::core::error::HistoryError;
use crate::core::history::HistoryStore;
use crate::core::model::{Decision, ExecutionRecord};
use crate::util::RequestId;

/// History backend selected at startup from configuration.
pub enum HistoryBackend {
    /// Volatile in-memory store.
    InMemory(InMemoryHistoryStore),
    /// Durable JSONL store.
    Jsonl(JsonlHistoryStore),
}

impl HistoryStore for HistoryBackend {
    fn append_decision(&self, decision: &Decision) -> Result<(), HistoryError> {
        match self {
            Self::InMemory(store) => store.append_decision(decision),
            Self::Jsonl(store) => store.append_decision(decision),
        }
    }

    fn append_execution(&self, record: &ExecutionRecord) -> Result<(), HistoryError> {
        match self {
            Self::InMemory(store) => store.append_execution(record),
            Self::Jsonl(store) => store.append_execution(record),
        }
    }

    fn decisions_for(&self, request_id: &RequestId) -> Result<Vec<Decision>, HistoryError> {
        match self {
            Self::InMemory(store) => store.decisions_for(request_id),
            Self::Jsonl(store) => store.decisions_for(request_id),
        }
    }

    fn executions_for(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ExecutionRecord>, HistoryError> {
        match self {
            Self::InMemory(store) => store.executions_for(request_id),
            Self::Jsonl(store) => store.executions_for(request_id),
        }
    }

    fn all_executions(&self) -> Result<Vec<ExecutionRecord>, HistoryError> {
        match self {
            Self::InMemory(store) => store.all_executions(),
            Self::Jsonl(store) => store.all_executions(),
        }
    }
}
