//! Configuration models for the selector, forecast cache, scheduler and history.

pub mod engine;

pub use engine::{
    EngineConfig, ForecastConfig, HistoryBackendConfig, SchedulerConfig, SelectorConfig,
};
