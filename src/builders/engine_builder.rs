//! Builders to construct a deferral scheduler from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{EngineConfig, HistoryBackendConfig};
use crate::core::error::{AppResult, HistoryError};
use crate::core::executor::WorkloadExecutor;
use crate::core::feedback::FeedbackLoop;
use crate::core::forecast::{ForecastCache, ForecastGateway};
use crate::core::history::HistoryStore;
use crate::core::scheduler::DeferralScheduler;
use crate::core::selector::CarbonAwareSelector;
use crate::core::uncertainty::EnergyProfileStore;
use crate::infra::{HistoryBackend, InMemoryDeferralQueue, InMemoryHistoryStore, JsonlHistoryStore};
use crate::util::Clock;

/// Scheduler backed by the in-memory deferral queue.
pub type EngineScheduler<G, E, H> = DeferralScheduler<G, E, H, InMemoryDeferralQueue>;

/// Open the history backend named in configuration.
pub fn open_history(cfg: &HistoryBackendConfig) -> Result<HistoryBackend, HistoryError> {
    match cfg {
        HistoryBackendConfig::InMemory => Ok(HistoryBackend::InMemory(InMemoryHistoryStore::new())),
        HistoryBackendConfig::Jsonl { dir } => Ok(HistoryBackend::Jsonl(JsonlHistoryStore::open(dir)?)),
    }
}

/// Build a scheduler from configuration and injected collaborators.
///
/// Energy profiles are rebuilt from `history` before the scheduler is
/// returned, so a restarted engine trusts the same profiles it had before.
pub fn build_scheduler<G, E, H>(
    cfg: &EngineConfig,
    gateway: G,
    executor: E,
    history: Arc<H>,
    clock: Arc<dyn Clock>,
) -> AppResult<EngineScheduler<G, E, H>>
where
    G: ForecastGateway,
    E: WorkloadExecutor,
    H: HistoryStore,
{
    cfg.validate()
        .map_err(|e| anyhow::anyhow!("config invalid: {e}"))?;

    let settings = cfg.scheduler.to_settings();
    let selector = CarbonAwareSelector::new(cfg.selector.to_settings(settings.base_interval));
    let forecasts = ForecastCache::new(gateway, cfg.forecast.to_settings());

    let profiles = Arc::new(EnergyProfileStore::new(cfg.selector.min_profile_samples));
    let feedback = FeedbackLoop::new(profiles, history);
    let replayed = feedback
        .bootstrap()
        .context("rebuilding energy profiles from history")?;

    info!(
        threshold = cfg.selector.carbon_threshold,
        risk_coefficient = cfg.selector.risk_coefficient,
        replayed,
        "deferral scheduler built"
    );

    Ok(DeferralScheduler::new(
        settings,
        selector,
        forecasts,
        feedback,
        executor,
        InMemoryDeferralQueue::new(),
        clock,
    ))
}
