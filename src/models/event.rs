//! Monitor events: fire-and-forget messages about lifecycle and job activity.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Classification of a [`MonitorEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A job (or session) began executing.
    JobStarted,
    /// A job is being retried.
    JobRetry,
    /// A job finished successfully.
    JobCompleted,
    /// A job finished unsuccessfully.
    JobFailed,
    /// A session's backing process disappeared while it was live.
    OrphanedJob,
    /// A session was paused.
    SessionPaused,
    /// A session was resumed.
    SessionResumed,
    /// A session was stopped by an operator.
    SessionStopped,
}

impl EventType {
    /// Wire name, e.g. `job_started`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::JobRetry => "job_retry",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::OrphanedJob => "orphaned_job",
            Self::SessionPaused => "session_paused",
            Self::SessionResumed => "session_resumed",
            Self::SessionStopped => "session_stopped",
        }
    }
}

/// Transient message consumed by the monitor. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorEvent {
    /// What happened.
    pub event_type: EventType,
    /// Job (or session name) the event concerns.
    pub job_id: String,
    /// Event-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl MonitorEvent {
    /// Construct an event with an arbitrary payload.
    #[must_use]
    pub fn new(event_type: EventType, job_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            job_id: job_id.into(),
            data,
        }
    }

    /// A `job_started` event.
    #[must_use]
    pub fn job_started(job_id: impl Into<String>) -> Self {
        Self::new(EventType::JobStarted, job_id, Value::Null)
    }

    /// A `job_retry` event carrying the attempt number.
    #[must_use]
    pub fn job_retry(job_id: impl Into<String>, attempt: u32) -> Self {
        Self::new(EventType::JobRetry, job_id, json!({ "attempt": attempt }))
    }

    /// A `job_completed` event carrying the run duration.
    #[must_use]
    pub fn job_completed(job_id: impl Into<String>, duration: Duration) -> Self {
        Self::new(
            EventType::JobCompleted,
            job_id,
            json!({ "duration_ms": duration_millis(duration) }),
        )
    }

    /// A `job_failed` event carrying the run duration and failure reason.
    #[must_use]
    pub fn job_failed(job_id: impl Into<String>, duration: Duration, reason: &str) -> Self {
        Self::new(
            EventType::JobFailed,
            job_id,
            json!({ "duration_ms": duration_millis(duration), "reason": reason }),
        )
    }

    /// An `orphaned_job` event for a session whose process vanished.
    #[must_use]
    pub fn orphaned_job(job_id: impl Into<String>, pid: u32) -> Self {
        Self::new(EventType::OrphanedJob, job_id, json!({ "pid": pid }))
    }

    /// Duration payload, if the event carries one.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.data
            .get("duration_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
    }

    /// Retry attempt payload, if the event carries one.
    #[must_use]
    pub fn attempt(&self) -> Option<u64> {
        self.data.get("attempt").and_then(Value::as_u64)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
