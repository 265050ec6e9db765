//! Engine configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;
use crate::core::forecast::ForecastSettings;
use crate::core::scheduler::SchedulerSettings;
use crate::core::selector::{SelectorSettings, StrategyTier};

/// Path to a JSON config file.
pub const CONFIG_PATH_ENV: &str = "CARBON_ENGINE_CONFIG";
/// Override for the carbon threshold.
pub const THRESHOLD_ENV: &str = "CARBON_THRESHOLD";
/// Override for the risk coefficient.
pub const RISK_COEFFICIENT_ENV: &str = "CARBON_RISK_K";

/// Selector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Carbon threshold (gCO2eq/kWh).
    pub carbon_threshold: f64,
    /// Risk coefficient `k`.
    pub risk_coefficient: f64,
    /// Observations before an energy profile is trusted.
    pub min_profile_samples: u64,
    /// Coefficient of variation treated as high variability.
    pub max_energy_cv: f64,
    /// Strategy tiers, ascending by upper bound.
    pub tiers: Vec<StrategyTier>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let defaults = SelectorSettings::default();
        Self {
            carbon_threshold: defaults.threshold,
            risk_coefficient: defaults.risk_coefficient,
            min_profile_samples: 3,
            max_energy_cv: defaults.max_energy_cv,
            tiers: defaults.tiers,
        }
    }
}

/// Forecast cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Confidence level of the intervals requested from the provider.
    pub confidence_level: f64,
    /// Cache TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Gateway call timeout in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Forecast lead time in seconds.
    pub lead_time_secs: u64,
    /// Half-width multiplier for degraded forecasts.
    pub degraded_widening: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            cache_ttl_secs: 300,
            fetch_timeout_ms: 2_000,
            lead_time_secs: 0,
            degraded_widening: 1.5,
        }
    }
}

impl ForecastConfig {
    /// Runtime settings for the forecast cache.
    pub fn to_settings(&self) -> ForecastSettings {
        ForecastSettings {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            lead_time: Duration::from_secs(self.lead_time_secs),
            confidence_level: self.confidence_level,
            degraded_widening: self.degraded_widening,
        }
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// First re-evaluation delay in seconds.
    pub base_interval_secs: u64,
    /// Backoff multiplier per escalation.
    pub backoff_factor: f64,
    /// Backoff cap in seconds.
    pub max_interval_secs: u64,
    /// Delay before an execution retry in seconds.
    pub retry_delay_secs: u64,
    /// Retries after a failed execution.
    pub max_execution_retries: u32,
    /// Executor timeout in seconds.
    pub execution_timeout_secs: u64,
    /// Control loop period in milliseconds.
    pub tick_interval_ms: u64,
    /// Parallel re-evaluations per tick; defaults to the CPU count.
    pub max_parallel_evaluations: Option<usize>,
    /// Entries popped per tick.
    pub max_batch: usize,
    /// How long finished requests stay queryable before the control loop forgets them.
    pub finished_retention_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 300,
            backoff_factor: 2.0,
            max_interval_secs: 3_600,
            retry_delay_secs: 30,
            max_execution_retries: 3,
            execution_timeout_secs: 600,
            tick_interval_ms: 1_000,
            max_parallel_evaluations: None,
            max_batch: 1_024,
            finished_retention_secs: 3_600,
        }
    }
}

impl SchedulerConfig {
    /// Runtime settings for the scheduler.
    pub fn to_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            base_interval: Duration::from_secs(self.base_interval_secs),
            backoff_factor: self.backoff_factor,
            max_interval: Duration::from_secs(self.max_interval_secs),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            max_execution_retries: self.max_execution_retries,
            execution_timeout: Duration::from_secs(self.execution_timeout_secs),
            max_parallel_evaluations: self
                .max_parallel_evaluations
                .unwrap_or_else(num_cpus::get),
            max_batch: self.max_batch,
            finished_retention: Duration::from_secs(self.finished_retention_secs),
        }
    }

    /// Control loop period.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// History backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum HistoryBackendConfig {
    /// In-memory history, lost on restart.
    #[default]
    InMemory,
    /// JSON-lines files under `dir`.
    Jsonl {
        /// Directory holding the streams.
        dir: PathBuf,
    },
}

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Selector settings.
    pub selector: SelectorConfig,
    /// Forecast cache settings.
    pub forecast: ForecastConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// History backend.
    pub history: HistoryBackendConfig,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

impl SelectorConfig {
    /// Validate selector values, including tier monotonicity.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.carbon_threshold.is_finite() && self.carbon_threshold > 0.0) {
            return Err("carbon_threshold must be a positive number".into());
        }
        if !(self.risk_coefficient.is_finite() && self.risk_coefficient >= 0.0) {
            return Err("risk_coefficient must be >= 0".into());
        }
        if self.min_profile_samples < 2 {
            return Err("min_profile_samples must be at least 2".into());
        }
        if self.max_energy_cv.is_nan() || self.max_energy_cv <= 0.0 {
            return Err("max_energy_cv must be greater than 0".into());
        }
        if self.tiers.is_empty() {
            return Err("at least one strategy tier must be defined".into());
        }
        for pair in self.tiers.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if upper.upper_bound <= lower.upper_bound {
                return Err(format!(
                    "tier bounds must be strictly increasing ({} then {})",
                    lower.upper_bound, upper.upper_bound
                ));
            }
            if upper.strategy < lower.strategy {
                return Err(format!(
                    "tier strategies must not get less efficient as carbon rises ({} then {})",
                    lower.strategy, upper.strategy
                ));
            }
        }
        Ok(())
    }

    /// Runtime settings for the selector.
    pub fn to_settings(&self, reevaluation_interval: Duration) -> SelectorSettings {
        SelectorSettings {
            threshold: self.carbon_threshold,
            risk_coefficient: self.risk_coefficient,
            max_energy_cv: self.max_energy_cv,
            reevaluation_interval,
            tiers: self.tiers.clone(),
        }
    }
}

impl ForecastConfig {
    /// Validate forecast values.
    pub fn validate(&self) -> Result<(), String> {
        if self.confidence_level.is_nan() || self.confidence_level <= 0.0 || self.confidence_level >= 1.0 {
            return Err("confidence_level must be within (0, 1)".into());
        }
        if self.fetch_timeout_ms == 0 {
            return Err("fetch_timeout_ms must be greater than 0".into());
        }
        if self.degraded_widening.is_nan() || self.degraded_widening < 1.0 {
            return Err("degraded_widening must be >= 1".into());
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate scheduler values.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_interval_secs == 0 {
            return Err("base_interval_secs must be greater than 0".into());
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err("backoff_factor must be >= 1".into());
        }
        if self.max_interval_secs < self.base_interval_secs {
            return Err("max_interval_secs must be >= base_interval_secs".into());
        }
        if self.execution_timeout_secs == 0 {
            return Err("execution_timeout_secs must be greater than 0".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.max_parallel_evaluations == Some(0) {
            return Err("max_parallel_evaluations must be greater than 0".into());
        }
        if self.max_batch == 0 {
            return Err("max_batch must be greater than 0".into());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.selector
            .validate()
            .map_err(|e| format!("selector invalid: {e}"))?;
        self.forecast
            .validate()
            .map_err(|e| format!("forecast invalid: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading config {}", path.display()))
    }

    /// Load from the environment: `.env` first, then the JSON file named by
    /// `CARBON_ENGINE_CONFIG` (defaults otherwise), then scalar overrides.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply scalar overrides from a lookup, then re-validate.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(THRESHOLD_ENV) {
            self.selector.carbon_threshold = raw
                .trim()
                .parse()
                .with_context(|| format!("{THRESHOLD_ENV}={raw}"))?;
        }
        if let Some(raw) = lookup(RISK_COEFFICIENT_ENV) {
            self.selector.risk_coefficient = raw
                .trim()
                .parse()
                .with_context(|| format!("{RISK_COEFFICIENT_ENV}={raw}"))?;
        }
        self.validate().map_err(anyhow::Error::msg)
    }
}
