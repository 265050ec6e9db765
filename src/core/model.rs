//! Records that flow through the engine: requests in, decisions and
//! execution records out.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::util::{Fingerprint, RequestId, Strategy, Urgency};

/// Joules in one kilowatt-hour.
pub const JOULES_PER_KWH: f64 = 3_600_000.0;

/// Grams of CO2eq for `joules` of energy at `intensity` gCO2eq/kWh.
pub fn carbon_grams(joules: f64, intensity: f64) -> f64 {
    joules / JOULES_PER_KWH * intensity
}

/// A unit of work awaiting a run-or-defer decision.
///
/// Created by intake and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    /// Unique request identifier.
    pub id: RequestId,
    /// Stable hash of the normalized workload.
    pub fingerprint: Fingerprint,
    /// Caller-declared urgency.
    pub urgency: Urgency,
    /// Submission timestamp (ms since epoch).
    pub submitted_at_ms: u128,
    /// Absolute deadline (ms since epoch), if any.
    pub deadline_ms: Option<u128>,
    /// Grid region the workload runs in.
    pub region: String,
}

impl WorkRequest {
    /// Build a request without a deadline.
    pub fn new(
        id: impl Into<RequestId>,
        fingerprint: impl Into<Fingerprint>,
        urgency: Urgency,
        region: impl Into<String>,
        submitted_at_ms: u128,
    ) -> Self {
        Self {
            id: id.into(),
            fingerprint: fingerprint.into(),
            urgency,
            submitted_at_ms,
            deadline_ms: None,
            region: region.into(),
        }
    }

    /// Attach an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline_ms: u128) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }
}

/// Run now or wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Hand the request to the executor now.
    Execute,
    /// Keep the request parked until a later re-evaluation.
    Defer,
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Critical urgency overrides carbon optimisation.
    CriticalUrgency,
    /// Deadline passed or falls within one re-evaluation interval.
    DeadlineImminent,
    /// The scheduler's own deadline guard forced execution.
    DeadlineGuard,
    /// Conservative estimate at or below the threshold.
    WithinThreshold,
    /// Conservative estimate above the threshold.
    AboveThreshold,
    /// No forecast was ever obtained for the region; executing conservatively.
    ForecastMissing,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CriticalUrgency => "critical urgency overrides carbon deferral",
            Self::DeadlineImminent => "deadline passed or within one re-evaluation interval",
            Self::DeadlineGuard => "scheduler deadline guard forced execution",
            Self::WithinThreshold => "conservative carbon estimate within threshold",
            Self::AboveThreshold => "conservative carbon estimate above threshold",
            Self::ForecastMissing => "no forecast available, executing conservatively",
        };
        f.write_str(s)
    }
}

/// How the strategy of an executing decision was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyBasis {
    /// Urgency or deadline override pinned the fastest strategy.
    Override,
    /// Picked from the configured carbon tiers.
    Tier,
    /// Too few samples to trust the energy profile.
    UnknownVariability,
    /// Energy profile too noisy to trust.
    HighVariability,
    /// No carbon estimate to place in a tier.
    UnknownCarbon,
}

/// Energy profile figures used for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyAssessment {
    /// Mean observed energy (J).
    pub mean_joules: f64,
    /// Sample standard deviation (J).
    pub stddev_joules: f64,
    /// Number of observations behind the figures.
    pub sample_count: u64,
    /// `mean + k * stddev`.
    pub risk_adjusted_joules: f64,
}

/// Append-only audit record of one selector or guard evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier.
    pub decision_id: String,
    /// Request this decision is about.
    pub request_id: RequestId,
    /// Execute or defer.
    pub outcome: DecisionOutcome,
    /// Strategy, present only when executing.
    pub strategy: Option<Strategy>,
    /// How the strategy was chosen.
    pub strategy_basis: Option<StrategyBasis>,
    /// Why.
    pub reason: DecisionReason,
    /// Conservative carbon estimate used (gCO2eq/kWh), if one was available.
    pub conservative_estimate: Option<f64>,
    /// Threshold in force (gCO2eq/kWh).
    pub threshold: f64,
    /// `conservative_estimate - threshold`; positive means above the threshold.
    pub margin: Option<f64>,
    /// The forecast came from a fallback (stale cache, confidence mismatch, or none at all).
    pub degraded: bool,
    /// Age of the forecast behind the estimate (ms).
    pub forecast_age_ms: Option<u128>,
    /// Energy profile figures, when the profile was trustworthy.
    pub energy: Option<EnergyAssessment>,
    /// Risk-adjusted expected emissions for one run (g CO2eq).
    pub expected_carbon_grams: Option<f64>,
    /// How many times the request had already been re-deferred.
    pub escalation_count: u32,
    /// Evaluation timestamp (ms since epoch).
    pub evaluated_at_ms: u128,
}

impl Decision {
    /// Decision issued by the scheduler's deadline guard, independent of the selector.
    pub fn deadline_guard(
        request_id: RequestId,
        threshold: f64,
        escalation_count: u32,
        now_ms: u128,
    ) -> Self {
        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            request_id,
            outcome: DecisionOutcome::Execute,
            strategy: Some(Strategy::Fast),
            strategy_basis: Some(StrategyBasis::Override),
            reason: DecisionReason::DeadlineGuard,
            conservative_estimate: None,
            threshold,
            margin: None,
            degraded: false,
            forecast_age_ms: None,
            energy: None,
            expected_carbon_grams: None,
            escalation_count,
            evaluated_at_ms: now_ms,
        }
    }

    /// Whether the request should run now.
    pub fn is_execute(&self) -> bool {
        self.outcome == DecisionOutcome::Execute
    }

    /// Stamp the escalation count known to the scheduler.
    #[must_use]
    pub fn with_escalation(mut self, escalation_count: u32) -> Self {
        self.escalation_count = escalation_count;
        self
    }

    /// One-line human-readable explanation.
    pub fn explain(&self) -> String {
        let mut out = match (self.outcome, self.strategy) {
            (DecisionOutcome::Execute, Some(s)) => format!("execute ({s}): {}", self.reason),
            (DecisionOutcome::Execute, None) => format!("execute: {}", self.reason),
            (DecisionOutcome::Defer, _) => format!("defer: {}", self.reason),
        };
        if let (Some(estimate), Some(margin)) = (self.conservative_estimate, self.margin) {
            let _ = write!(
                out,
                "; estimate {estimate:.1} vs threshold {:.1} (margin {margin:+.1})",
                self.threshold
            );
        }
        if self.degraded {
            out.push_str("; degraded forecast");
        }
        out
    }
}

/// Outcome of one run, produced after the executor reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Request that ran.
    pub request_id: RequestId,
    /// Workload fingerprint, so profiles can be rebuilt from history.
    pub fingerprint: Fingerprint,
    /// Strategy used.
    pub strategy: Strategy,
    /// Energy consumed (J).
    pub energy_joules: f64,
    /// Grid carbon intensity during the run (gCO2eq/kWh).
    pub carbon_intensity: f64,
    /// Wall time of the run (ms).
    pub duration_ms: u64,
    /// Completion timestamp (ms since epoch).
    pub executed_at_ms: u128,
}

impl ExecutionRecord {
    /// Emissions of this run in grams of CO2eq.
    pub fn carbon_grams(&self) -> f64 {
        carbon_grams(self.energy_joules, self.carbon_intensity)
    }

    /// Average power draw in watts.
    pub fn power_watts(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        self.energy_joules / (self.duration_ms as f64 / 1_000.0)
    }
}
