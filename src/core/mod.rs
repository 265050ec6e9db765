//! Domain model, decision logic and the deferral scheduler.

pub mod audit;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod forecast;
pub mod history;
pub mod model;
pub mod scheduler;
pub mod selector;
pub mod uncertainty;

pub use audit::{
    build_audit_event, build_audit_event_at, AuditEvent, AuditSink, InMemoryAuditSink,
    LifecycleAction, SharedAuditSink,
};
pub use error::{AppResult, ExecutionError, ForecastError, HistoryError, SchedulerError};
pub use executor::{ExecutionMeasurement, WorkloadExecutor};
pub use feedback::{FeedbackLoop, RequestTrail};
pub use forecast::{CarbonForecast, CarbonSignal, ForecastCache, ForecastGateway, ForecastSettings};
pub use history::{ExecutionSummary, HistoryStore};
pub use model::{
    carbon_grams, Decision, DecisionOutcome, DecisionReason, EnergyAssessment, ExecutionRecord,
    StrategyBasis, WorkRequest,
};
pub use scheduler::{
    DeferralQueue, DeferralScheduler, DeferredEntry, Disposition, EnqueueOutcome, EntryKind,
    FailureReport, RequestStatus, SchedulerSettings, TickReport,
};
pub use selector::{CarbonAwareSelector, SelectorSettings, StrategyTier};
pub use uncertainty::{
    conservative_estimate, widened_estimate, ConservativeEstimate, EnergyProfile,
    EnergyProfileStore, EnergyReliability,
};
