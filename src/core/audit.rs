//! Audit sink for job state transitions.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use super::JobState;

/// One recorded state transition.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Run the event belongs to.
    pub run_id: String,
    /// Job label.
    pub job: String,
    /// Position of the job in the submitted list.
    pub index: usize,
    /// State entered.
    pub state: JobState,
    /// Cpuset held at the time, if any.
    pub cores: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
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
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// States recorded for one job, in order.
    #[must_use]
    pub fn states_for(&self, index: usize) -> Vec<JobState> {
        self.events
            .iter()
            .filter(|e| e.index == index)
            .map(|e| e.state.clone())
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that forwards every event to `tracing` at debug level.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::debug!(
            run_id = %event.run_id,
            job = %event.job,
            state = event.state.action(),
            cores = event.cores.as_deref().unwrap_or("-"),
            "job state transition"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    run_id: impl Into<String>,
    job: impl Into<String>,
    index: usize,
    state: JobState,
    cores: Option<String>,
) -> AuditEvent {
    AuditEvent {
        run_id: run_id.into(),
        job: job.into(),
        index,
        state,
        cores,
        created_at_ms: now_ms(),
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
