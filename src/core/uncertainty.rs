//! Uncertainty model: conservative carbon estimates and per-workload energy
//! variability.
//!
//! # Carbon
//!
//! A forecast is a point estimate with a symmetric interval. The engine uses
//! the lower bound, `point - half_width`, so it only defers when even the
//! carbon-favourable end of the interval is above the threshold.
//!
//! # Energy
//!
//! Each workload fingerprint has an [`EnergyProfile`] updated online with
//! Welford's algorithm: O(1) per observation and O(1) memory per fingerprint.
//! The [`EnergyProfileStore`] keeps one mutex per fingerprint so concurrent
//! execution records for the same workload serialize their updates while
//! different workloads never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::forecast::CarbonForecast;
use crate::core::model::ExecutionRecord;
use crate::util::Fingerprint;

/// Lower bound of a forecast interval, with the inputs that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConservativeEstimate {
    /// Point forecast (gCO2eq/kWh).
    pub point: f64,
    /// Effective half-width after any degradation widening.
    pub half_width: f64,
    /// `point - half_width`.
    pub value: f64,
}

/// `forecast.point - forecast.half_width`.
pub fn conservative_estimate(forecast: &CarbonForecast) -> ConservativeEstimate {
    widened_estimate(forecast, 1.0)
}

/// Conservative estimate with the interval half-width scaled by `widening`.
///
/// Used for degraded forecasts: a wider interval lowers the bound, which
/// biases the decision toward executing rather than deferring on stale data.
pub fn widened_estimate(forecast: &CarbonForecast, widening: f64) -> ConservativeEstimate {
    let half_width = forecast.half_width * widening.max(1.0);
    ConservativeEstimate {
        point: forecast.point,
        half_width,
        value: forecast.point - half_width,
    }
}

/// Running energy statistics for one workload fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyProfile {
    /// Number of observations.
    pub count: u64,
    /// Running mean (J).
    pub mean: f64,
    /// Sum of squared deviations from the mean.
    pub m2: f64,
}

impl EnergyProfile {
    /// Fold one observation in.
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Sample variance; `None` with fewer than two observations.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 1).then(|| (self.m2 / (self.count - 1) as f64).max(0.0))
    }

    /// Sample standard deviation; `None` with fewer than two observations.
    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// What the selector may assume about a workload's energy use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergyReliability {
    /// Enough samples to trust the figures.
    Known {
        /// Mean energy (J).
        mean: f64,
        /// Sample standard deviation (J).
        stddev: f64,
        /// Number of observations.
        sample_count: u64,
    },
    /// Too few samples; variability must be treated as unknown.
    InsufficientData {
        /// Number of observations so far.
        sample_count: u64,
    },
}

impl EnergyReliability {
    /// Number of observations behind this estimate.
    pub const fn sample_count(&self) -> u64 {
        match self {
            Self::Known { sample_count, .. } | Self::InsufficientData { sample_count } => {
                *sample_count
            }
        }
    }
}

/// Explicitly owned map from fingerprint to energy profile.
///
/// Shared by reference between the selector path (reads) and the feedback
/// path (writes).
#[derive(Debug)]
pub struct EnergyProfileStore {
    profiles: RwLock<HashMap<Fingerprint, Arc<Mutex<EnergyProfile>>>>,
    min_samples: u64,
}

impl EnergyProfileStore {
    /// Create an empty store trusting profiles with at least `min_samples` observations.
    pub fn new(min_samples: u64) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            min_samples: min_samples.max(2),
        }
    }

    /// Minimum observations before a profile is trusted.
    pub const fn min_samples(&self) -> u64 {
        self.min_samples
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Arc<Mutex<EnergyProfile>> {
        if let Some(slot) = self.profiles.read().get(fingerprint) {
            return Arc::clone(slot);
        }
        let mut profiles = self.profiles.write();
        Arc::clone(profiles.entry(fingerprint.clone()).or_default())
    }

    /// Record one observed energy value. Non-finite or negative values are
    /// ignored and reported as `false`.
    pub fn update(&self, fingerprint: &Fingerprint, observed_joules: f64) -> bool {
        if !observed_joules.is_finite() || observed_joules < 0.0 {
            warn!(%fingerprint, observed_joules, "ignoring invalid energy observation");
            return false;
        }
        let slot = self.slot(fingerprint);
        let mut profile = slot.lock();
        profile.observe(observed_joules);
        debug!(
            %fingerprint,
            count = profile.count,
            mean = profile.mean,
            "energy profile updated"
        );
        true
    }

    /// Current reliability of the profile for `fingerprint`.
    pub fn reliability(&self, fingerprint: &Fingerprint) -> EnergyReliability {
        let Some(profile) = self.snapshot(fingerprint) else {
            return EnergyReliability::InsufficientData { sample_count: 0 };
        };
        match profile.stddev() {
            Some(stddev) if profile.count >= self.min_samples => EnergyReliability::Known {
                mean: profile.mean,
                stddev,
                sample_count: profile.count,
            },
            _ => EnergyReliability::InsufficientData {
                sample_count: profile.count,
            },
        }
    }

    /// Copy of the current profile, if any observations exist.
    pub fn snapshot(&self, fingerprint: &Fingerprint) -> Option<EnergyProfile> {
        let profiles = self.profiles.read();
        profiles.get(fingerprint).map(|slot| *slot.lock())
    }

    /// Number of fingerprints with at least one observation.
    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    /// Whether no profile exists yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace all profiles with ones rebuilt from persisted execution history.
    /// Returns the number of records applied.
    pub fn rebuild<'a, I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = &'a ExecutionRecord>,
    {
        let mut rebuilt: HashMap<Fingerprint, EnergyProfile> = HashMap::new();
        let mut applied = 0;
        for record in records {
            if !record.energy_joules.is_finite() || record.energy_joules < 0.0 {
                continue;
            }
            rebuilt
                .entry(record.fingerprint.clone())
                .or_default()
                .observe(record.energy_joules);
            applied += 1;
        }
        let mut profiles = self.profiles.write();
        *profiles = rebuilt
            .into_iter()
            .map(|(fp, profile)| (fp, Arc::new(Mutex::new(profile))))
            .collect();
        applied
    }
}
