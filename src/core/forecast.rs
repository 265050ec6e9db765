//! Forecast gateway boundary and the short-TTL forecast cache.
//!
//! The gateway itself (an HTTP client for a carbon-intensity provider) lives
//! outside this crate. [`ForecastCache`] wraps it with:
//!
//! - a per-region TTL cache so a burst of re-evaluations in the same tick
//!   window shares one fetch,
//! - a per-region single-flight lock so concurrent misses do not stampede
//!   the provider,
//! - a fetch timeout,
//! - fallback to the last cached forecast when the provider is unavailable,
//!   flagged as degraded and with a widened interval.
//!
//! It never turns a missing forecast into "no constraint": with nothing
//! cached at all it reports an empty estimate and the selector executes with
//! the most conservative strategy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::ForecastError;
use crate::core::uncertainty::{conservative_estimate, widened_estimate, ConservativeEstimate};

/// Point + interval carbon-intensity forecast for a region and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonForecast {
    /// Grid region.
    pub region: String,
    /// Time the forecast is for (ms since epoch).
    pub target_ms: u128,
    /// Point estimate (gCO2eq/kWh).
    pub point: f64,
    /// Interval half-width at `confidence` (gCO2eq/kWh).
    pub half_width: f64,
    /// Confidence level of the interval, e.g. `0.95`.
    pub confidence: f64,
    /// Age of the forecast when the provider served it (ms).
    pub age_ms: u128,
}

impl CarbonForecast {
    fn validate(&self) -> Result<(), ForecastError> {
        if !self.point.is_finite() || !self.half_width.is_finite() {
            return Err(ForecastError::Invalid("non-finite forecast values".into()));
        }
        if self.half_width < 0.0 {
            return Err(ForecastError::Invalid("negative interval half-width".into()));
        }
        Ok(())
    }
}

/// Source of carbon forecasts (consumed, implemented outside the engine).
#[async_trait]
pub trait ForecastGateway: Send + Sync + 'static {
    /// Forecast for `region`, `lead_time` ahead of now.
    async fn get_forecast(
        &self,
        region: &str,
        lead_time: Duration,
    ) -> Result<CarbonForecast, ForecastError>;
}

/// Carbon input handed to the selector for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbonSignal {
    /// Conservative estimate, absent only when no forecast was ever obtained.
    pub estimate: Option<ConservativeEstimate>,
    /// Whether the estimate comes from a fallback path.
    pub degraded: bool,
    /// Total age of the underlying forecast (ms).
    pub forecast_age_ms: Option<u128>,
}

impl CarbonSignal {
    /// Fresh signal from a forecast.
    pub fn fresh(forecast: &CarbonForecast) -> Self {
        Self {
            estimate: Some(conservative_estimate(forecast)),
            degraded: false,
            forecast_age_ms: Some(forecast.age_ms),
        }
    }

    /// No forecast at all.
    pub const fn missing() -> Self {
        Self {
            estimate: None,
            degraded: true,
            forecast_age_ms: None,
        }
    }
}

/// Knobs of the forecast cache.
#[derive(Debug, Clone)]
pub struct ForecastSettings {
    /// How long a fetched forecast is served without refetching.
    pub cache_ttl: Duration,
    /// Upper bound on one gateway call.
    pub fetch_timeout: Duration,
    /// Lead time requested from the gateway.
    pub lead_time: Duration,
    /// Confidence level the engine was configured for.
    pub confidence_level: f64,
    /// Multiplier applied to the half-width of degraded forecasts.
    pub degraded_widening: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(2),
            lead_time: Duration::ZERO,
            confidence_level: 0.95,
            degraded_widening: 1.5,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedForecast {
    forecast: CarbonForecast,
    fetched_at_ms: u128,
}

/// TTL cache in front of a [`ForecastGateway`].
pub struct ForecastCache<G> {
    gateway: G,
    settings: ForecastSettings,
    entries: Mutex<HashMap<String, CachedForecast>>,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<G: ForecastGateway> ForecastCache<G> {
    /// Wrap a gateway.
    pub fn new(gateway: G, settings: ForecastSettings) -> Self {
        Self {
            gateway,
            settings,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Settings in force.
    pub const fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    /// Resolve the carbon signal for `region` at `now_ms`.
    pub async fn signal(&self, region: &str, now_ms: u128) -> CarbonSignal {
        if let Some(cached) = self.fresh_entry(region, now_ms) {
            return self.signal_from(&cached, now_ms, false);
        }

        let flight = {
            let mut inflight = self.inflight.lock();
            Arc::clone(inflight.entry(region.to_string()).or_default())
        };
        let _guard = flight.lock().await;

        // Another caller may have refreshed the entry while we waited.
        if let Some(cached) = self.fresh_entry(region, now_ms) {
            return self.signal_from(&cached, now_ms, false);
        }

        match self.fetch(region).await {
            Ok(forecast) => {
                let cached = CachedForecast {
                    forecast,
                    fetched_at_ms: now_ms,
                };
                self.entries.lock().insert(region.to_string(), cached.clone());
                let mismatch =
                    (cached.forecast.confidence - self.settings.confidence_level).abs() > 1e-6;
                if mismatch {
                    warn!(
                        region,
                        served = cached.forecast.confidence,
                        configured = self.settings.confidence_level,
                        "forecast confidence level differs from configuration"
                    );
                }
                self.signal_from(&cached, now_ms, mismatch)
            }
            Err(err) => {
                warn!(region, error = %err, "forecast fetch failed, falling back to cache");
                self.fallback(region, now_ms)
            }
        }
    }

    /// Drop every cached forecast.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    async fn fetch(&self, region: &str) -> Result<CarbonForecast, ForecastError> {
        let call = self.gateway.get_forecast(region, self.settings.lead_time);
        let forecast = tokio::time::timeout(self.settings.fetch_timeout, call)
            .await
            .map_err(|_| ForecastError::Timeout(self.settings.fetch_timeout))??;
        forecast.validate()?;
        debug!(region, point = forecast.point, half_width = forecast.half_width, "forecast fetched");
        Ok(forecast)
    }

    fn fresh_entry(&self, region: &str, now_ms: u128) -> Option<CachedForecast> {
        let ttl_ms = self.settings.cache_ttl.as_millis();
        let entries = self.entries.lock();
        entries
            .get(region)
            .filter(|c| now_ms.saturating_sub(c.fetched_at_ms) < ttl_ms)
            .cloned()
    }

    fn fallback(&self, region: &str, now_ms: u128) -> CarbonSignal {
        let cached = self.entries.lock().get(region).cloned();
        match cached {
            Some(cached) => self.signal_from(&cached, now_ms, true),
            None => {
                warn!(region, "no cached forecast, decision will be degraded");
                CarbonSignal::missing()
            }
        }
    }

    fn signal_from(&self, cached: &CachedForecast, now_ms: u128, degraded: bool) -> CarbonSignal {
        let age = cached
            .forecast
            .age_ms
            .saturating_add(now_ms.saturating_sub(cached.fetched_at_ms));
        let estimate = if degraded {
            widened_estimate(&cached.forecast, self.settings.degraded_widening)
        } else {
            conservative_estimate(&cached.forecast)
        };
        CarbonSignal {
            estimate: Some(estimate),
            degraded,
            forecast_age_ms: Some(age),
        }
    }
}
