//! Per-job metrics collection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::models::metrics::JobMetrics;

/// Sink for per-job counters.
///
/// Every update touches exactly one job's entry, so updates for different
/// jobs commute.
pub trait MetricsCollector: Send + Sync {
    /// Count one start of `job_id`.
    fn increment_job_started(&self, job_id: &str);

    /// Count one completion of `job_id`; `success` selects the counter.
    fn increment_job_completed(&self, job_id: &str, success: bool);

    /// Count one retry of `job_id`.
    fn increment_job_retry(&self, job_id: &str, attempt: u64);

    /// Add `duration` to the job's cumulative run time.
    fn record_job_duration(&self, job_id: &str, duration: Duration);

    /// Flag the job as orphaned. Stays set until [`clear_orphaned_job`](Self::clear_orphaned_job).
    fn record_orphaned_job(&self, job_id: &str);

    /// Reset the orphan flag for `job_id`.
    fn clear_orphaned_job(&self, job_id: &str);

    /// Snapshot of one job's metrics. Unknown jobs yield zeroed metrics.
    fn get_job_metrics(&self, job_id: &str) -> JobMetrics;

    /// Snapshot of every tracked job, sorted by job id.
    fn all_job_metrics(&self) -> Vec<JobMetrics>;
}

/// Process-local [`MetricsCollector`] backed by a hash map.
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    jobs: Mutex<HashMap<String, JobMetrics>>,
}

impl InMemoryMetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobMetrics>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobMetrics)) {
        let mut jobs = self.jobs();
        let entry = jobs
            .entry(job_id.to_owned())
            .or_insert_with(|| JobMetrics::new(job_id));
        apply(entry);
        entry.last_updated = Some(Utc::now());
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn increment_job_started(&self, job_id: &str) {
        self.update(job_id, |m| m.start_count += 1);
    }

    fn increment_job_completed(&self, job_id: &str, success: bool) {
        self.update(job_id, |m| {
            if success {
                m.success_count += 1;
            } else {
                m.failure_count += 1;
            }
        });
    }

    fn increment_job_retry(&self, job_id: &str, attempt: u64) {
        debug!(job_id, attempt, "recording job retry");
        self.update(job_id, |m| m.retry_count += 1);
    }

    fn record_job_duration(&self, job_id: &str, duration: Duration) {
        self.update(job_id, |m| m.total_duration += duration);
    }

    fn record_orphaned_job(&self, job_id: &str) {
        self.update(job_id, |m| m.is_orphaned = true);
    }

    fn clear_orphaned_job(&self, job_id: &str) {
        let mut jobs = self.jobs();
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.is_orphaned = false;
            entry.last_updated = Some(Utc::now());
        }
    }

    fn get_job_metrics(&self, job_id: &str) -> JobMetrics {
        self.jobs()
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| JobMetrics::new(job_id))
    }

    fn all_job_metrics(&self) -> Vec<JobMetrics> {
        let mut all: Vec<JobMetrics> = self.jobs().values().cloned().collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        all
    }
}
