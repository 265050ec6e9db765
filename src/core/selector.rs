//! Carbon-aware selector: the pure run-or-defer decision function.
//!
//! Rules, in order:
//!
//! 1. `Critical` urgency, or a deadline that has passed or falls within one
//!    re-evaluation interval, executes immediately with [`Strategy::Fast`].
//! 2. No carbon estimate at all executes with [`Strategy::Efficient`],
//!    flagged degraded. Missing data never stalls work.
//! 3. A conservative estimate at or below the threshold executes; the
//!    strategy comes from the tier table, unless the energy profile is
//!    unknown or too noisy, which pins [`Strategy::Efficient`].
//! 4. Anything else defers.
//!
//! The selector owns no mutable state. It reads its inputs and returns
//! exactly one [`Decision`]; the scheduler decides what to do with it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::forecast::CarbonSignal;
use crate::core::model::{
    carbon_grams, Decision, DecisionOutcome, DecisionReason, EnergyAssessment, StrategyBasis,
    WorkRequest,
};
use crate::core::uncertainty::EnergyReliability;
use crate::util::{Strategy, Urgency};

/// One row of the tier table: estimates strictly below `upper_bound` use `strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyTier {
    /// Exclusive upper bound on the conservative estimate (gCO2eq/kWh).
    pub upper_bound: f64,
    /// Strategy for estimates in this tier.
    pub strategy: Strategy,
}

/// Knobs of the selector.
#[derive(Debug, Clone)]
pub struct SelectorSettings {
    /// Carbon threshold above which deferrable work waits (gCO2eq/kWh).
    pub threshold: f64,
    /// Risk coefficient `k` in `mean + k * stddev`.
    pub risk_coefficient: f64,
    /// Coefficient of variation (stddev / mean) above which a profile counts as highly variable.
    pub max_energy_cv: f64,
    /// Re-evaluation interval; deadlines closer than this are imminent.
    pub reevaluation_interval: Duration,
    /// Ordered by ascending `upper_bound`; estimates past the last bound use `Efficient`.
    pub tiers: Vec<StrategyTier>,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            threshold: 500.0,
            risk_coefficient: 1.0,
            max_energy_cv: 0.5,
            reevaluation_interval: Duration::from_secs(300),
            tiers: vec![
                StrategyTier {
                    upper_bound: 250.0,
                    strategy: Strategy::Fast,
                },
                StrategyTier {
                    upper_bound: 400.0,
                    strategy: Strategy::Balanced,
                },
            ],
        }
    }
}

/// Decision engine fusing carbon, energy and urgency inputs.
#[derive(Debug, Clone)]
pub struct CarbonAwareSelector {
    settings: SelectorSettings,
}

impl CarbonAwareSelector {
    /// Build a selector. Tiers are sorted by upper bound.
    pub fn new(mut settings: SelectorSettings) -> Self {
        settings
            .tiers
            .sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));
        Self { settings }
    }

    /// Settings in force.
    pub const fn settings(&self) -> &SelectorSettings {
        &self.settings
    }

    /// Carbon threshold in force.
    pub const fn threshold(&self) -> f64 {
        self.settings.threshold
    }

    /// Evaluate one request.
    pub fn evaluate(
        &self,
        request: &WorkRequest,
        signal: &CarbonSignal,
        reliability: &EnergyReliability,
        now_ms: u128,
    ) -> Decision {
        let estimate = signal.estimate.map(|e| e.value);
        let energy = self.assess_energy(reliability);

        let (outcome, strategy, basis, reason) = if request.urgency == Urgency::Critical {
            (
                DecisionOutcome::Execute,
                Some(Strategy::Fast),
                Some(StrategyBasis::Override),
                DecisionReason::CriticalUrgency,
            )
        } else if self.deadline_imminent(request, now_ms) {
            (
                DecisionOutcome::Execute,
                Some(Strategy::Fast),
                Some(StrategyBasis::Override),
                DecisionReason::DeadlineImminent,
            )
        } else {
            match estimate {
                None => (
                    DecisionOutcome::Execute,
                    Some(Strategy::Efficient),
                    Some(StrategyBasis::UnknownCarbon),
                    DecisionReason::ForecastMissing,
                ),
                Some(value) if value <= self.settings.threshold => {
                    let (strategy, basis) = self.select_strategy(value, reliability);
                    (
                        DecisionOutcome::Execute,
                        Some(strategy),
                        Some(basis),
                        DecisionReason::WithinThreshold,
                    )
                }
                Some(_) => (DecisionOutcome::Defer, None, None, DecisionReason::AboveThreshold),
            }
        };

        Decision {
            decision_id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            outcome,
            strategy,
            strategy_basis: basis,
            reason,
            conservative_estimate: estimate,
            threshold: self.settings.threshold,
            margin: estimate.map(|v| v - self.settings.threshold),
            degraded: signal.degraded,
            forecast_age_ms: signal.forecast_age_ms,
            energy,
            expected_carbon_grams: energy
                .zip(estimate)
                .map(|(e, v)| carbon_grams(e.risk_adjusted_joules, v.max(0.0))),
            escalation_count: 0,
            evaluated_at_ms: now_ms,
        }
    }

    /// Whether the deadline has passed or falls within one re-evaluation interval.
    pub fn deadline_imminent(&self, request: &WorkRequest, now_ms: u128) -> bool {
        request.deadline_ms.is_some_and(|deadline| {
            deadline <= now_ms.saturating_add(self.settings.reevaluation_interval.as_millis())
        })
    }

    /// Strategy for an executing, non-override decision.
    pub fn select_strategy(
        &self,
        estimate: f64,
        reliability: &EnergyReliability,
    ) -> (Strategy, StrategyBasis) {
        match *reliability {
            EnergyReliability::InsufficientData { .. } => {
                (Strategy::Efficient, StrategyBasis::UnknownVariability)
            }
            EnergyReliability::Known { mean, stddev, .. } if self.highly_variable(mean, stddev) => {
                (Strategy::Efficient, StrategyBasis::HighVariability)
            }
            EnergyReliability::Known { .. } => (self.tier_for(estimate), StrategyBasis::Tier),
        }
    }

    /// Tier lookup: first tier whose upper bound exceeds `estimate`.
    pub fn tier_for(&self, estimate: f64) -> Strategy {
        self.settings
            .tiers
            .iter()
            .find(|tier| estimate < tier.upper_bound)
            .map_or(Strategy::Efficient, |tier| tier.strategy)
    }

    fn highly_variable(&self, mean: f64, stddev: f64) -> bool {
        if mean <= 0.0 {
            return stddev > 0.0;
        }
        stddev / mean > self.settings.max_energy_cv
    }

    fn assess_energy(&self, reliability: &EnergyReliability) -> Option<EnergyAssessment> {
        match *reliability {
            EnergyReliability::Known {
                mean,
                stddev,
                sample_count,
            } => Some(EnergyAssessment {
                mean_joules: mean,
                stddev_joules: stddev,
                sample_count,
                risk_adjusted_joules: mean + self.settings.risk_coefficient * stddev,
            }),
            EnergyReliability::InsufficientData { .. } => None,
        }
    }
}
