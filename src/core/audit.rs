//! Lifecycle audit sink.
//!
//! Decisions are persisted through the history store. This sink records the
//! lifecycle transitions around them (submitted, deferred, escalated,
//! executed, retried, failed, canceled) for operators and tests.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::RequestId;

/// Lifecycle transition of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Accepted for initial evaluation.
    Submitted,
    /// First deferral.
    Deferred,
    /// Deferred again after a re-evaluation.
    Escalated,
    /// Duplicate enqueue merged into the live entry.
    Merged,
    /// Handed to the executor and completed.
    Executed,
    /// Deadline guard forced execution.
    Forced,
    /// Executor failed; retry scheduled.
    RetryScheduled,
    /// Retries exhausted.
    Failed,
    /// Withdrawn before execution.
    Canceled,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Deferred => "deferred",
            Self::Escalated => "escalated",
            Self::Merged => "merged",
            Self::Executed => "executed",
            Self::Forced => "forced",
            Self::RetryScheduled => "retry_scheduled",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related request.
    pub request_id: RequestId,
    /// Grid region of the request.
    pub region: String,
    /// Transition taken.
    pub action: LifecycleAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that forwards events to a shared in-memory buffer, so a test or
/// dashboard can read what the scheduler recorded.
#[derive(Clone)]
pub struct SharedAuditSink {
    inner: std::sync::Arc<parking_lot::Mutex<InMemoryAuditSink>>,
}

impl SharedAuditSink {
    /// Create a shared sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: std::sync::Arc::new(parking_lot::Mutex::new(InMemoryAuditSink::new(max_events))),
        }
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().events()
    }

    /// Actions recorded for one request, in order.
    pub fn actions_for(&self, request_id: &RequestId) -> Vec<LifecycleAction> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| &e.request_id == request_id)
            .map(|e| e.action)
            .collect()
    }
}

impl AuditSink for SharedAuditSink {
    fn record(&mut self, event: AuditEvent) {
        self.inner.lock().record(event);
    }
}

/// Helper to build an audit event from context, stamped with wall-clock time.
pub fn build_audit_event(
    request_id: &RequestId,
    region: impl Into<String>,
    action: LifecycleAction,
    detail: Option<String>,
) -> AuditEvent {
    build_audit_event_at(request_id, region, action, detail, now_ms())
}

/// Like [`build_audit_event`], with an explicit timestamp from the caller's clock.
pub fn build_audit_event_at(
    request_id: &RequestId,
    region: impl Into<String>,
    action: LifecycleAction,
    detail: Option<String>,
    created_at_ms: u128,
) -> AuditEvent {
    AuditEvent {
        event_id: format!("{request_id}-{action}-{}", uuid::Uuid::new_v4()),
        request_id: request_id.clone(),
        region: region.into(),
        action,
        created_at_ms,
        detail,
    }
}
