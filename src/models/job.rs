//! Job record: an idempotent unit of dispatched work.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::event::MonitorEvent;
use crate::monitoring::MonitorHandle;
use crate::{AppError, Result};

/// Lifecycle status for a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be executed.
    Pending,
    /// Work is in progress.
    Running,
    /// Work finished successfully.
    Completed,
    /// Work finished with an error.
    Failed,
}

impl JobStatus {
    /// Whether `execute` short-circuits in this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug)]
struct JobInner {
    status: JobStatus,
    last_error: Option<AppError>,
}

/// A unit of work whose execution is safe to dispatch more than once.
///
/// Once the job reaches `Completed` or `Failed`, [`execute`](Self::execute)
/// returns the recorded outcome without running the work again until the
/// caller resets the status with [`set_status`](Self::set_status) or
/// [`retry`](Self::retry).
#[derive(Debug)]
pub struct JobRecord {
    id: String,
    inner: Mutex<JobInner>,
    executions: AtomicU64,
    monitor: Option<MonitorHandle>,
}

impl JobRecord {
    /// Create a pending job.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(JobInner {
                status: JobStatus::Pending,
                last_error: None,
            }),
            executions: AtomicU64::new(0),
            monitor: None,
        }
    }

    /// Report starts, completions, failures and retries to a monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorHandle) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Job identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Error recorded by the most recent failed or cancelled execution.
    #[must_use]
    pub fn last_error(&self) -> Option<AppError> {
        self.lock().last_error.clone()
    }

    /// How many times the work closure has actually been invoked.
    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Overwrite the status. No transition validation: the last call wins.
    pub fn set_status(&self, status: JobStatus) {
        let mut inner = self.lock();
        Self::write_status(&self.id, &mut inner, status);
    }

    /// Put the job back to `Pending` for another attempt and report the retry.
    pub fn retry(&self, attempt: u32) {
        self.set_status(JobStatus::Pending);
        self.emit(MonitorEvent::job_retry(self.id.clone(), attempt));
    }

    /// Run `work` unless the job already reached a terminal status.
    ///
    /// - `Completed`: returns `Ok(())` without running anything.
    /// - `Failed`: returns the recorded error without running anything.
    /// - `Running`: another dispatch is in flight; returns `AppError::Conflict`.
    /// - `Pending`: runs `work`, racing it against `cancel`.
    ///
    /// A cancelled run puts the job back to `Pending`.
    ///
    /// # Errors
    ///
    /// Returns the work's error, the recorded error of a failed job,
    /// `AppError::Conflict` for concurrent dispatch, or `AppError::Cancelled`.
    pub async fn execute<F, Fut>(&self, cancel: &CancellationToken, work: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        {
            let mut inner = self.lock();
            match inner.status {
                JobStatus::Completed => {
                    debug!(job_id = %self.id, "job already completed; skipping");
                    return Ok(());
                }
                JobStatus::Failed => {
                    debug!(job_id = %self.id, "job already failed; returning recorded error");
                    return Err(inner.last_error.clone().unwrap_or_else(|| {
                        AppError::Conflict(format!("job '{}' previously failed", self.id))
                    }));
                }
                JobStatus::Running => {
                    return Err(AppError::Conflict(format!(
                        "job '{}' is already running",
                        self.id
                    )));
                }
                JobStatus::Pending => {
                    inner.last_error = None;
                    Self::write_status(&self.id, &mut inner, JobStatus::Running);
                }
            }
        }

        self.executions.fetch_add(1, Ordering::SeqCst);
        self.emit(MonitorEvent::job_started(self.id.clone()));
        let started = Instant::now();

        let outcome = tokio::select! {
            () = cancel.cancelled() => None,
            result = work() => Some(result),
        };

        let elapsed = started.elapsed();
        let mut inner = self.lock();
        match outcome {
            Some(Ok(())) => {
                Self::write_status(&self.id, &mut inner, JobStatus::Completed);
                drop(inner);
                info!(job_id = %self.id, elapsed_ms = elapsed.as_millis(), "job completed");
                self.emit(MonitorEvent::job_completed(self.id.clone(), elapsed));
                Ok(())
            }
            Some(Err(err)) => {
                inner.last_error = Some(err.clone());
                Self::write_status(&self.id, &mut inner, JobStatus::Failed);
                drop(inner);
                warn!(job_id = %self.id, %err, "job failed");
                self.emit(MonitorEvent::job_failed(
                    self.id.clone(),
                    elapsed,
                    &err.to_string(),
                ));
                Err(err)
            }
            None => {
                let err = AppError::Cancelled(format!("job '{}' was cancelled", self.id));
                inner.last_error = Some(err.clone());
                Self::write_status(&self.id, &mut inner, JobStatus::Pending);
                drop(inner);
                warn!(job_id = %self.id, "job cancelled");
                Err(err)
            }
        }
    }

    fn write_status(id: &str, inner: &mut JobInner, status: JobStatus) {
        if inner.status != status {
            debug!(job_id = id, from = ?inner.status, to = ?status, "job status change");
        }
        inner.status = status;
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(monitor) = &self.monitor {
            monitor.log_event(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
