//! Intake-facing request/response models.

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::executor::WorkloadExecutor;
use crate::core::forecast::ForecastGateway;
use crate::core::history::HistoryStore;
use crate::core::model::WorkRequest;
use crate::core::scheduler::{DeferralQueue, DeferralScheduler, Disposition, RequestStatus};
use crate::util::{Fingerprint, RequestId, Strategy, Urgency};

/// Request submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Caller-chosen identifier; generated when absent.
    #[serde(default)]
    pub request_id: Option<RequestId>,
    /// Workload fingerprint.
    pub fingerprint: Fingerprint,
    /// Urgency class.
    #[serde(default)]
    pub urgency: Urgency,
    /// Optional deadline (ms since epoch).
    #[serde(default)]
    pub deadline_ms: Option<u128>,
    /// Grid region.
    pub region: String,
}

impl SubmitRequest {
    /// Turn the payload into a work request stamped at `now_ms`.
    pub fn into_work_request(self, now_ms: u128) -> WorkRequest {
        let id = self.request_id.unwrap_or_else(RequestId::generate);
        let request = WorkRequest::new(id, self.fingerprint, self.urgency, self.region, now_ms);
        match self.deadline_ms {
            Some(deadline) => request.with_deadline(deadline),
            None => request,
        }
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Ran immediately.
    Executed,
    /// Parked for later.
    Deferred,
    /// Merged into an existing deferral.
    Merged,
    /// Execution failed and a retry is scheduled.
    RetryScheduled,
    /// Execution failed terminally.
    Failed,
}

/// Submission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Request identifier.
    pub request_id: RequestId,
    /// What happened.
    pub outcome: SubmitOutcome,
    /// Strategy used when executed.
    pub strategy: Option<Strategy>,
    /// Next check when parked.
    pub next_check_ms: Option<u128>,
}

/// Request status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Request identifier.
    pub request_id: RequestId,
    /// Current status; `None` when unknown.
    pub status: Option<RequestStatus>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Live deferral entries.
    pub pending: usize,
}

/// Submit a request to the scheduler.
pub async fn submit_request<G, E, H, Q>(
    scheduler: &DeferralScheduler<G, E, H, Q>,
    req: SubmitRequest,
    now_ms: u128,
) -> Result<SubmitResponse, SchedulerError>
where
    G: ForecastGateway,
    E: WorkloadExecutor,
    H: HistoryStore,
    Q: DeferralQueue,
{
    let request = req.into_work_request(now_ms);
    let request_id = request.id.clone();
    let disposition = scheduler.submit(request).await?;
    let (outcome, strategy, next_check_ms) = match disposition {
        Disposition::Executed { record, .. } => (SubmitOutcome::Executed, Some(record.strategy), None),
        Disposition::Deferred { next_check_ms, .. } => {
            (SubmitOutcome::Deferred, None, Some(next_check_ms))
        }
        Disposition::Merged { next_check_ms } => (SubmitOutcome::Merged, None, Some(next_check_ms)),
        Disposition::RetryScheduled { next_check_ms, .. } => {
            (SubmitOutcome::RetryScheduled, None, Some(next_check_ms))
        }
        Disposition::Failed(report) => (SubmitOutcome::Failed, Some(report.strategy), None),
        Disposition::Vanished => return Err(SchedulerError::UnknownRequest(request_id)),
    };
    Ok(SubmitResponse {
        request_id,
        outcome,
        strategy,
        next_check_ms,
    })
}

/// Look up a request's status.
pub fn status_of<G, E, H, Q>(
    scheduler: &DeferralScheduler<G, E, H, Q>,
    request_id: RequestId,
) -> StatusResponse
where
    G: ForecastGateway,
    E: WorkloadExecutor,
    H: HistoryStore,
    Q: DeferralQueue,
{
    let status = scheduler.status(&request_id);
    StatusResponse { request_id, status }
}

/// Return a health payload.
pub fn health<G, E, H, Q>(scheduler: &DeferralScheduler<G, E, H, Q>) -> Health
where
    G: ForecastGateway,
    E: WorkloadExecutor,
    H: HistoryStore,
    Q: DeferralQueue,
{
    Health {
        ok: true,
        pending: scheduler.pending_count(),
    }
}
