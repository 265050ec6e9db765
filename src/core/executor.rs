//! Executor handoff abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::ExecutionError;
use crate::core::model::{ExecutionRecord, WorkRequest};
use crate::util::Strategy;

/// What the execution backend measured for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMeasurement {
    /// Energy consumed (J).
    pub energy_joules: f64,
    /// Grid carbon intensity during the run (gCO2eq/kWh).
    pub carbon_intensity: f64,
    /// Wall time (ms).
    pub duration_ms: u64,
}

impl ExecutionMeasurement {
    /// Turn a measurement into the append-only record for `request`.
    pub fn into_record(
        self,
        request: &WorkRequest,
        strategy: Strategy,
        executed_at_ms: u128,
    ) -> ExecutionRecord {
        ExecutionRecord {
            request_id: request.id.clone(),
            fingerprint: request.fingerprint.clone(),
            strategy,
            energy_joules: self.energy_joules,
            carbon_intensity: self.carbon_intensity,
            duration_ms: self.duration_ms,
            executed_at_ms,
        }
    }
}

/// Backend that actually runs a workload with a chosen strategy.
///
/// The backend lives outside the engine; the scheduler wraps every call in a
/// timeout and treats a timeout like any other failure.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use carbon_aware_scheduler::core::{ExecutionMeasurement, WorkloadExecutor, WorkRequest};
/// use carbon_aware_scheduler::core::ExecutionError;
/// use carbon_aware_scheduler::util::Strategy;
///
/// struct DuckDbExecutor;
///
/// #[async_trait]
/// impl WorkloadExecutor for DuckDbExecutor {
///     async fn execute(
///         &self,
///         request: &WorkRequest,
///         strategy: Strategy,
///     ) -> Result<ExecutionMeasurement, ExecutionError> {
///         let threads = match strategy {
///             Strategy::Fast => 8,
///             Strategy::Balanced => 4,
///             Strategy::Efficient => 1,
///         };
///         run_with_threads(&request.fingerprint, threads).await
///     }
/// }
/// ```
#[async_trait]
pub trait WorkloadExecutor: Send + Sync + 'static {
    /// Run `request` with `strategy` and report what it cost.
    async fn execute(
        &self,
        request: &WorkRequest,
        strategy: Strategy,
    ) -> Result<ExecutionMeasurement, ExecutionError>;
}
