//! Deferral scheduler: owns deferred requests and re-evaluates them until
//! they execute, fail terminally, or are canceled.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──► Deferred ⇄ (re-evaluating) ──► Executed
//!    │            │                               ▲
//!    │            └──► RetryPending ──────────────┤
//!    └────────────────────────────────────────────┘
//!                 any live state ──► Canceled
//!                 RetryPending (cap reached) ──► Failed
//! ```
//!
//! # Concurrency
//!
//! Every request owns an async mutex guarding its state. Submission,
//! re-evaluation, retry and cancellation all take that lock, so one
//! request's lifecycle is serialized while distinct requests proceed in
//! parallel. A tick pops every due entry from the min-heap queue and
//! re-evaluates them concurrently on a [`JoinSet`], bounded by a semaphore.
//!
//! # Deadlines
//!
//! The selector already executes requests whose deadline is imminent. The
//! scheduler checks again on every tick before consulting the selector at
//! all (`now + base_interval >= deadline` forces `Fast`), and clamps every
//! `next_check` so a backed-off entry is always looked at before its
//! deadline guard would be too late.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_audit_event_at, AuditSink, LifecycleAction};
use crate::core::error::{ExecutionError, SchedulerError};
use crate::core::executor::WorkloadExecutor;
use crate::core::feedback::{FeedbackLoop, RequestTrail};
use crate::core::forecast::{ForecastCache, ForecastGateway};
use crate::core::history::{ExecutionSummary, HistoryStore};
use crate::core::model::{Decision, ExecutionRecord, WorkRequest};
use crate::core::selector::CarbonAwareSelector;
use crate::core::uncertainty::EnergyProfileStore;
use crate::util::{Clock, RequestId, Strategy};

/// What a queued entry is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Re-run the selector.
    Reevaluate,
    /// Retry a failed executor handoff.
    RetryExecution {
        /// Strategy chosen by the original decision.
        strategy: Strategy,
        /// Retry number (1 for the first retry).
        attempt: u32,
    },
}

/// A parked request awaiting its next check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEntry {
    /// Request this entry belongs to.
    pub request_id: RequestId,
    /// When the entry becomes due (ms since epoch).
    pub next_check_ms: u128,
    /// Number of re-deferrals so far.
    pub escalation_count: u32,
    /// Deadline copied from the request.
    pub deadline_ms: Option<u128>,
    /// Re-evaluation or execution retry.
    pub kind: EntryKind,
}

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No live entry existed for the request.
    Inserted,
    /// A live entry existed and was updated in place.
    Merged,
}

/// Abstraction for deferral queue backends.
///
/// At most one live entry exists per request id.
pub trait DeferralQueue: Send + 'static {
    /// Insert an entry, or update the live entry for the same request.
    fn upsert(&mut self, entry: DeferredEntry) -> EnqueueOutcome;
    /// Remove and return up to `limit` entries due at `now_ms`, earliest first.
    fn pop_due(&mut self, now_ms: u128, limit: usize) -> Vec<DeferredEntry>;
    /// Remove the live entry for a request.
    fn remove(&mut self, request_id: &RequestId) -> Option<DeferredEntry>;
    /// Look up the live entry for a request.
    fn get(&self, request_id: &RequestId) -> Option<&DeferredEntry>;
    /// Time the earliest live entry becomes due.
    fn next_due_ms(&mut self) -> Option<u128>;
    /// Number of live entries.
    fn len(&self) -> usize;
    /// Whether no entry is live.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Knobs of the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// First re-evaluation delay; also the deadline guard window.
    pub base_interval: Duration,
    /// Multiplier applied per escalation (>= 1).
    pub backoff_factor: f64,
    /// Cap on the re-evaluation delay.
    pub max_interval: Duration,
    /// Fixed delay before retrying a failed execution.
    pub retry_delay: Duration,
    /// Retries after the first failed execution before giving up.
    pub max_execution_retries: u32,
    /// Upper bound on one executor handoff.
    pub execution_timeout: Duration,
    /// Entries re-evaluated concurrently within one tick.
    pub max_parallel_evaluations: usize,
    /// Entries popped per tick.
    pub max_batch: usize,
    /// How long a finished request stays queryable before it is purged.
    pub finished_retention: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(300),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(3_600),
            retry_delay: Duration::from_secs(30),
            max_execution_retries: 3,
            execution_timeout: Duration::from_secs(600),
            max_parallel_evaluations: num_cpus::get(),
            max_batch: 1_024,
            finished_retention: Duration::from_secs(3_600),
        }
    }
}

impl SchedulerSettings {
    /// Re-evaluation delay after `escalation_count` re-deferrals:
    /// `base * factor^n`, capped at `max_interval`. Non-decreasing in `n`.
    pub fn backoff_interval(&self, escalation_count: u32) -> Duration {
        let base = self.base_interval.as_secs_f64();
        let cap = self.max_interval.max(self.base_interval).as_secs_f64();
        let exponent = i32::try_from(escalation_count).unwrap_or(i32::MAX);
        let scaled = base * self.backoff_factor.max(1.0).powi(exponent);
        let bounded = if scaled.is_finite() { scaled.min(cap) } else { cap };
        Duration::from_secs_f64(bounded)
    }
}

/// Externally visible state of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Accepted, initial evaluation not finished.
    Pending,
    /// Parked until `next_check_ms`.
    Deferred {
        /// Next re-evaluation (ms since epoch).
        next_check_ms: u128,
        /// Re-deferrals so far.
        escalation_count: u32,
    },
    /// Execution failed; retry scheduled.
    RetryPending {
        /// Retry number.
        attempt: u32,
        /// When the retry runs (ms since epoch).
        next_check_ms: u128,
    },
    /// An evaluation or execution currently holds the request.
    InFlight,
    /// Ran to completion.
    Executed {
        /// Strategy used.
        strategy: Strategy,
        /// Completion time (ms since epoch).
        executed_at_ms: u128,
    },
    /// Retries exhausted.
    Failed {
        /// Execution attempts made.
        attempts: u32,
        /// Last executor error.
        last_error: String,
    },
    /// Withdrawn before execution.
    Canceled,
}

impl RequestStatus {
    /// Whether the request can no longer change state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed { .. } | Self::Failed { .. } | Self::Canceled)
    }
}

/// Hard failure surfaced after the retry cap, with the full trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Failed request.
    pub request_id: RequestId,
    /// Execution attempts made.
    pub attempts: u32,
    /// Strategy that was being executed.
    pub strategy: Strategy,
    /// Last executor error.
    pub last_error: String,
    /// Every decision recorded for the request.
    pub decisions: Vec<Decision>,
    /// Every execution record for the request.
    pub executions: Vec<ExecutionRecord>,
    /// When the request was marked failed (ms since epoch).
    pub failed_at_ms: u128,
}

/// What happened to a request after a submit or a processed entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// The executor ran the request.
    Executed {
        /// Record produced by the run.
        record: ExecutionRecord,
        /// Forced by the deadline guard.
        forced: bool,
    },
    /// Parked for a later re-evaluation.
    Deferred {
        /// Next re-evaluation (ms since epoch).
        next_check_ms: u128,
        /// Re-deferrals so far.
        escalation_count: u32,
    },
    /// Duplicate enqueue merged into the live entry.
    Merged {
        /// Next check of the live entry.
        next_check_ms: u128,
    },
    /// Execution failed; retry scheduled.
    RetryScheduled {
        /// Retry number.
        attempt: u32,
        /// When the retry runs.
        next_check_ms: u128,
    },
    /// Retries exhausted.
    Failed(Box<FailureReport>),
    /// The entry no longer referred to a live request (canceled, finished, or superseded).
    Vanished,
}

/// Counts from one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Entries popped and processed.
    pub processed: usize,
    /// Entries that executed.
    pub executed: usize,
    /// Of those, forced by the deadline guard.
    pub forced: usize,
    /// Entries deferred again.
    pub redeferred: usize,
    /// Execution retries scheduled.
    pub retried: usize,
    /// Requests that failed terminally.
    pub failed: usize,
    /// Entries whose request had vanished.
    pub vanished: usize,
}

impl TickReport {
    fn absorb(&mut self, disposition: &Disposition) {
        self.processed += 1;
        match disposition {
            Disposition::Executed { forced, .. } => {
                self.executed += 1;
                if *forced {
                    self.forced += 1;
                }
            }
            Disposition::Deferred { .. } | Disposition::Merged { .. } => self.redeferred += 1,
            Disposition::RetryScheduled { .. } => self.retried += 1,
            Disposition::Failed(_) => self.failed += 1,
            Disposition::Vanished => self.vanished += 1,
        }
    }
}

struct RequestSlot {
    request: WorkRequest,
    state: AsyncMutex<RequestStatus>,
    finished_at_ms: Mutex<Option<u128>>,
}

impl RequestSlot {
    /// Stamp the first time the slot is seen in a terminal state.
    fn note_finished(&self, state: &RequestStatus, now_ms: u128) {
        if state.is_terminal() {
            self.finished_at_ms.lock().get_or_insert(now_ms);
        }
    }

    /// Whether the request finished at least `retention_ms` before `now_ms`.
    fn expired(&self, now_ms: u128, retention_ms: u128) -> bool {
        self.finished_at_ms
            .lock()
            .is_some_and(|at| at.saturating_add(retention_ms) <= now_ms)
    }
}

/// Deferral scheduler with carbon-aware re-evaluation.
pub struct DeferralScheduler<G, E, H, Q> {
    settings: SchedulerSettings,
    selector: CarbonAwareSelector,
    forecasts: ForecastCache<G>,
    feedback: FeedbackLoop<H>,
    executor: E,
    queue: Mutex<Q>,
    slots: Mutex<HashMap<RequestId, Arc<RequestSlot>>>,
    failures: Mutex<HashMap<RequestId, FailureReport>>,
    clock: Arc<dyn Clock>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
}

impl<G, E, H, Q> DeferralScheduler<G, E, H, Q>
where
    G: ForecastGateway,
    E: WorkloadExecutor,
    H: HistoryStore,
    Q: DeferralQueue,
{
    /// Assemble a scheduler from its collaborators.
    ///
    /// The selector's re-evaluation interval should equal
    /// `settings.base_interval`; the builder takes care of that.
    pub fn new(
        settings: SchedulerSettings,
        selector: CarbonAwareSelector,
        forecasts: ForecastCache<G>,
        feedback: FeedbackLoop<H>,
        executor: E,
        queue: Q,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            selector,
            forecasts,
            feedback,
            executor,
            queue: Mutex::new(queue),
            slots: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            clock,
            audit: None,
        }
    }

    /// Attach a lifecycle audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Scheduler settings in force.
    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// The decision function.
    pub const fn selector(&self) -> &CarbonAwareSelector {
        &self.selector
    }

    /// Energy profiles read by the selector.
    pub const fn profiles(&self) -> &Arc<EnergyProfileStore> {
        self.feedback.profiles()
    }

    /// Feedback path shared with the executor side.
    pub const fn feedback(&self) -> &FeedbackLoop<H> {
        &self.feedback
    }

    /// Submit a new request for its initial evaluation.
    ///
    /// Resubmitting a request that is still deferred merges into its live
    /// entry and pushes `next_check` out to `now + base_interval`.
    pub async fn submit(&self, request: WorkRequest) -> Result<Disposition, SchedulerError> {
        let slot = self.slot_for(request);
        let request = &slot.request;
        let mut state = slot.state.lock().await;
        let now = self.clock.now_ms();

        match state.clone() {
            RequestStatus::Pending => {}
            RequestStatus::Deferred {
                escalation_count, ..
            } => {
                let next_check_ms = self.next_check(now, 0, request.deadline_ms);
                self.queue.lock().upsert(DeferredEntry {
                    request_id: request.id.clone(),
                    next_check_ms,
                    escalation_count,
                    deadline_ms: request.deadline_ms,
                    kind: EntryKind::Reevaluate,
                });
                *state = RequestStatus::Deferred {
                    next_check_ms,
                    escalation_count,
                };
                debug!(request_id = %request.id, next_check_ms, "duplicate enqueue merged");
                self.audit(request, LifecycleAction::Merged, None);
                return Ok(Disposition::Merged { next_check_ms });
            }
            RequestStatus::RetryPending { next_check_ms, .. } => {
                return Ok(Disposition::Merged { next_check_ms });
            }
            RequestStatus::InFlight
            | RequestStatus::Executed { .. }
            | RequestStatus::Failed { .. }
            | RequestStatus::Canceled => {
                return Err(SchedulerError::AlreadyFinished(request.id.clone()));
            }
        }

        info!(
            request_id = %request.id,
            urgency = %request.urgency,
            region = %request.region,
            "request submitted"
        );
        self.audit(request, LifecycleAction::Submitted, None);

        let decision = self.evaluate(request, 0, now).await;
        self.feedback.record_decision(&decision);
        let disposition = match decision.strategy.filter(|_| decision.is_execute()) {
            Some(strategy) => self.execute(request, &mut state, strategy, 0, false).await,
            None => self.defer(request, &mut state, 0, now),
        };
        slot.note_finished(&state, self.clock.now_ms());
        Ok(disposition)
    }

    /// Withdraw a request before execution. Returns `false` when the request
    /// is unknown or already finished; neither is an error.
    pub async fn cancel(&self, request_id: &RequestId) -> bool {
        let Some(slot) = self.slot(request_id) else {
            debug!(%request_id, "cancel for unknown request");
            return false;
        };
        let mut state = slot.state.lock().await;
        let live = matches!(
            *state,
            RequestStatus::Pending | RequestStatus::Deferred { .. } | RequestStatus::RetryPending { .. }
        );
        if !live {
            return false;
        }
        self.queue.lock().remove(request_id);
        *state = RequestStatus::Canceled;
        slot.note_finished(&state, self.clock.now_ms());
        info!(%request_id, "request canceled");
        self.audit(&slot.request, LifecycleAction::Canceled, None);
        true
    }

    /// Process every entry due now. Distinct entries run in parallel.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let now = self.clock.now_ms();
        let due = self.queue.lock().pop_due(now, self.settings.max_batch);
        let mut report = TickReport::default();
        if due.is_empty() {
            return report;
        }
        debug!(due = due.len(), "re-evaluating deferred entries");

        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_evaluations.max(1)));
        let mut tasks = JoinSet::new();
        for entry in due {
            let scheduler = Arc::clone(self);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                scheduler.process_entry(entry).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(disposition) => report.absorb(&disposition),
                Err(err) => error!(error = %err, "re-evaluation task aborted"),
            }
        }
        report
    }

    /// Current status of a request, or `None` if unknown.
    pub fn status(&self, request_id: &RequestId) -> Option<RequestStatus> {
        let slot = self.slot(request_id)?;
        let status = slot
            .state
            .try_lock()
            .map_or(RequestStatus::InFlight, |state| state.clone());
        Some(status)
    }

    /// Failure report for a request that exhausted its retries.
    pub fn failure_report(&self, request_id: &RequestId) -> Option<FailureReport> {
        self.failures.lock().get(request_id).cloned()
    }

    /// Decisions and executions recorded for a request.
    pub fn trail(&self, request_id: &RequestId) -> Result<RequestTrail, SchedulerError> {
        Ok(self.feedback.trail(request_id)?)
    }

    /// Statistics over all persisted executions.
    pub fn summary(&self) -> Result<ExecutionSummary, SchedulerError> {
        Ok(self.feedback.summary()?)
    }

    /// Number of live queue entries.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// When the next queued entry becomes due.
    pub fn next_due_ms(&self) -> Option<u128> {
        self.queue.lock().next_due_ms()
    }

    /// Forget requests that finished at least `retention` ago, together with
    /// their failure reports. Their ids may be reused afterwards. Returns the
    /// number of requests forgotten.
    pub fn purge_finished(&self, retention: Duration) -> usize {
        let now = self.clock.now_ms();
        let retention_ms = retention.as_millis();
        let mut purged = Vec::new();
        self.slots.lock().retain(|id, slot| {
            let finished = slot
                .state
                .try_lock()
                .is_ok_and(|state| state.is_terminal());
            let expired = finished && slot.expired(now, retention_ms);
            if expired {
                purged.push(id.clone());
            }
            !expired
        });
        if !purged.is_empty() {
            let mut failures = self.failures.lock();
            for id in &purged {
                failures.remove(id);
            }
            debug!(purged = purged.len(), "finished requests purged");
        }
        purged.len()
    }

    /// Number of requests the scheduler currently tracks, finished or not.
    pub fn tracked_count(&self) -> usize {
        self.slots.lock().len()
    }

    async fn process_entry(&self, entry: DeferredEntry) -> Disposition {
        let Some(slot) = self.slot(&entry.request_id) else {
            debug!(request_id = %entry.request_id, "deferred entry vanished");
            return Disposition::Vanished;
        };
        let request = &slot.request;
        let mut state = slot.state.lock().await;
        let now = self.clock.now_ms();

        let disposition = match (state.clone(), entry.kind) {
            (RequestStatus::Deferred { next_check_ms, .. }, _) if next_check_ms > now => {
                debug!(request_id = %request.id, "entry superseded by a later merge");
                Disposition::Vanished
            }
            (RequestStatus::Deferred { escalation_count, .. }, EntryKind::Reevaluate) => {
                self.reevaluate(request, &mut state, escalation_count, entry.deadline_ms, now)
                    .await
            }
            (
                RequestStatus::RetryPending { attempt, .. },
                EntryKind::RetryExecution { strategy, .. },
            ) => {
                info!(request_id = %request.id, attempt, %strategy, "retrying execution");
                self.execute(request, &mut state, strategy, attempt, false).await
            }
            (other, _) => {
                debug!(request_id = %request.id, state = ?other, "entry no longer live");
                Disposition::Vanished
            }
        };
        slot.note_finished(&state, self.clock.now_ms());
        disposition
    }

    async fn reevaluate(
        &self,
        request: &WorkRequest,
        state: &mut RequestStatus,
        escalation_count: u32,
        deadline_ms: Option<u128>,
        now: u128,
    ) -> Disposition {
        if self.deadline_guard_triggered(deadline_ms, now) {
            let decision = Decision::deadline_guard(
                request.id.clone(),
                self.selector.threshold(),
                escalation_count,
                now,
            );
            self.feedback.record_decision(&decision);
            warn!(
                request_id = %request.id,
                escalation_count,
                "deadline guard forcing execution"
            );
            return self.execute(request, state, Strategy::Fast, 0, true).await;
        }

        let decision = self.evaluate(request, escalation_count, now).await;
        self.feedback.record_decision(&decision);
        match decision.strategy.filter(|_| decision.is_execute()) {
            Some(strategy) => self.execute(request, state, strategy, 0, false).await,
            None => self.defer(request, state, escalation_count + 1, now),
        }
    }

    async fn evaluate(&self, request: &WorkRequest, escalation_count: u32, now: u128) -> Decision {
        let signal = self.forecasts.signal(&request.region, now).await;
        let reliability = self.feedback.profiles().reliability(&request.fingerprint);
        let decision = self
            .selector
            .evaluate(request, &signal, &reliability, now)
            .with_escalation(escalation_count);
        debug!(
            request_id = %request.id,
            decision = %decision.explain(),
            "selector evaluated"
        );
        decision
    }

    fn defer(
        &self,
        request: &WorkRequest,
        state: &mut RequestStatus,
        escalation_count: u32,
        now: u128,
    ) -> Disposition {
        let next_check_ms = self.next_check(now, escalation_count, request.deadline_ms);
        self.queue.lock().upsert(DeferredEntry {
            request_id: request.id.clone(),
            next_check_ms,
            escalation_count,
            deadline_ms: request.deadline_ms,
            kind: EntryKind::Reevaluate,
        });
        *state = RequestStatus::Deferred {
            next_check_ms,
            escalation_count,
        };
        info!(request_id = %request.id, escalation_count, next_check_ms, "request deferred");
        let action = if escalation_count == 0 {
            LifecycleAction::Deferred
        } else {
            LifecycleAction::Escalated
        };
        self.audit(request, action, Some(format!("next check at {next_check_ms}")));
        Disposition::Deferred {
            next_check_ms,
            escalation_count,
        }
    }

    async fn execute(
        &self,
        request: &WorkRequest,
        state: &mut RequestStatus,
        strategy: Strategy,
        attempt: u32,
        forced: bool,
    ) -> Disposition {
        let timeout = self.settings.execution_timeout;
        let result = tokio::time::timeout(timeout, self.executor.execute(request, strategy))
            .await
            .unwrap_or(Err(ExecutionError::Timeout(timeout)));
        let now = self.clock.now_ms();

        match result {
            Ok(measurement) => {
                let record = measurement.into_record(request, strategy, now);
                if let Err(err) = self.feedback.record_execution(&record) {
                    error!(request_id = %request.id, error = %err, "failed to persist execution record");
                }
                self.queue.lock().remove(&request.id);
                *state = RequestStatus::Executed {
                    strategy,
                    executed_at_ms: now,
                };
                info!(
                    request_id = %request.id,
                    %strategy,
                    forced,
                    energy_joules = record.energy_joules,
                    carbon_grams = record.carbon_grams(),
                    "request executed"
                );
                let action = if forced {
                    LifecycleAction::Forced
                } else {
                    LifecycleAction::Executed
                };
                self.audit(request, action, Some(format!("strategy {strategy}")));
                Disposition::Executed { record, forced }
            }
            Err(err) if attempt < self.settings.max_execution_retries => {
                let next_attempt = attempt + 1;
                let next_check_ms = now.saturating_add(self.settings.retry_delay.as_millis());
                self.queue.lock().upsert(DeferredEntry {
                    request_id: request.id.clone(),
                    next_check_ms,
                    escalation_count: 0,
                    deadline_ms: request.deadline_ms,
                    kind: EntryKind::RetryExecution {
                        strategy,
                        attempt: next_attempt,
                    },
                });
                *state = RequestStatus::RetryPending {
                    attempt: next_attempt,
                    next_check_ms,
                };
                warn!(
                    request_id = %request.id,
                    attempt = next_attempt,
                    error = %err,
                    "execution failed, retry scheduled"
                );
                self.audit(request, LifecycleAction::RetryScheduled, Some(err.to_string()));
                Disposition::RetryScheduled {
                    attempt: next_attempt,
                    next_check_ms,
                }
            }
            Err(err) => {
                self.queue.lock().remove(&request.id);
                let trail = self.feedback.trail(&request.id).unwrap_or_else(|history_err| {
                    error!(request_id = %request.id, error = %history_err, "failed to load trail");
                    RequestTrail::default()
                });
                let report = FailureReport {
                    request_id: request.id.clone(),
                    attempts: attempt + 1,
                    strategy,
                    last_error: err.to_string(),
                    decisions: trail.decisions,
                    executions: trail.executions,
                    failed_at_ms: now,
                };
                *state = RequestStatus::Failed {
                    attempts: report.attempts,
                    last_error: report.last_error.clone(),
                };
                error!(
                    request_id = %request.id,
                    attempts = report.attempts,
                    error = %err,
                    "execution retries exhausted"
                );
                self.failures.lock().insert(request.id.clone(), report.clone());
                self.audit(request, LifecycleAction::Failed, Some(err.to_string()));
                Disposition::Failed(Box::new(report))
            }
        }
    }

    fn deadline_guard_triggered(&self, deadline_ms: Option<u128>, now: u128) -> bool {
        let window = self.settings.base_interval.as_millis();
        deadline_ms.is_some_and(|deadline| now.saturating_add(window) >= deadline)
    }

    /// Next check for a request deferred `escalation_count` times, clamped
    /// so the deadline guard still fires before the deadline.
    fn next_check(&self, now: u128, escalation_count: u32, deadline_ms: Option<u128>) -> u128 {
        let interval = self.settings.backoff_interval(escalation_count).as_millis();
        let next = now.saturating_add(interval);
        match deadline_ms {
            Some(deadline) => {
                let guard_at = deadline.saturating_sub(self.settings.base_interval.as_millis());
                next.min(guard_at.max(now))
            }
            None => next,
        }
    }

    fn slot(&self, request_id: &RequestId) -> Option<Arc<RequestSlot>> {
        self.slots.lock().get(request_id).cloned()
    }

    fn slot_for(&self, request: WorkRequest) -> Arc<RequestSlot> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(request.id.clone()).or_insert_with(|| {
            Arc::new(RequestSlot {
                request,
                state: AsyncMutex::new(RequestStatus::Pending),
                finished_at_ms: Mutex::new(None),
            })
        });
        Arc::clone(slot)
    }

    fn audit(&self, request: &WorkRequest, action: LifecycleAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            let event = build_audit_event_at(
                &request.id,
                request.region.clone(),
                action,
                detail,
                self.clock.now_ms(),
            );
            sink.lock().record(event);
        }
    }
}
