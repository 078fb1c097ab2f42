//! Per-job metrics snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated counters for one job, keyed by job id in the collector.
///
/// Values handed out by a collector are copies; mutating them has no effect
/// on the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobMetrics {
    /// Job identifier.
    pub job_id: String,
    /// Times the job started.
    pub start_count: u64,
    /// Times the job completed successfully.
    pub success_count: u64,
    /// Times the job completed unsuccessfully.
    pub failure_count: u64,
    /// Times the job was retried.
    pub retry_count: u64,
    /// Cumulative recorded run time.
    pub total_duration: Duration,
    /// Set when the job was found orphaned; reset only by an explicit clear.
    pub is_orphaned: bool,
    /// Last time any counter for this job changed.
    pub last_updated: Option<DateTime<Utc>>,
}

impl JobMetrics {
    /// Empty metrics for a job.
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }
}
