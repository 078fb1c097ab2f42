//! Monitor event consumer.
//!
//! Producers submit [`MonitorEvent`]s through a cloneable [`MonitorHandle`]
//! onto a bounded `tokio::sync::mpsc` channel. A single background task
//! drains the channel in submission order and fans each event into the
//! metrics collector, the alert registry, and `tracing` output.
//!
//! Submission never blocks: when the channel is full (or the monitor has
//! been stopped) the event is dropped and counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::alert::AlertSeverity;
use crate::models::event::{EventType, MonitorEvent};

use super::alerts::AlertManager;
use super::metrics::MetricsCollector;

/// Alert message raised for orphaned sessions.
pub const ORPHANED_JOB_ALERT: &str = "Orphaned job detected";

/// Alert message raised for failed jobs.
pub const JOB_FAILED_ALERT: &str = "Job failed";

/// Counters shared between producers and the consumer.
#[derive(Debug, Default)]
struct PipelineStats {
    accepted: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
    progress: Notify,
}

impl PipelineStats {
    fn is_idle(&self) -> bool {
        self.processed.load(Ordering::SeqCst) >= self.accepted.load(Ordering::SeqCst)
    }
}

/// Producer side of the monitor channel.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorEvent>,
    stats: Arc<PipelineStats>,
}

impl MonitorHandle {
    /// Enqueue an event without waiting.
    ///
    /// Returns `false` when the event was dropped because the queue is full
    /// or the monitor no longer accepts events.
    pub fn log_event(&self, event: MonitorEvent) -> bool {
        if self.stats.closed.load(Ordering::SeqCst) {
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            debug!(job_id = %event.job_id, event_type = event.event_type.as_str(), "monitor stopped; event rejected");
            return false;
        }

        // Count before sending so the consumer can never observe an event
        // that is not yet accounted for.
        self.stats.accepted.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.reject();
                warn!(
                    job_id = %event.job_id,
                    event_type = event.event_type.as_str(),
                    "monitor queue full; event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.reject();
                debug!(job_id = %event.job_id, "monitor channel closed; event dropped");
                false
            }
        }
    }

    /// Number of events dropped so far.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.stats.dropped.load(Ordering::SeqCst)
    }

    fn reject(&self) {
        self.stats.accepted.fetch_sub(1, Ordering::SeqCst);
        self.stats.dropped.fetch_add(1, Ordering::SeqCst);
        self.stats.progress.notify_waiters();
    }
}

/// Applies events to the metrics collector and alert registry.
#[derive(Clone)]
struct EventProcessor {
    metrics: Arc<dyn MetricsCollector>,
    alerts: Arc<dyn AlertManager>,
}

impl EventProcessor {
    fn apply(&self, event: &MonitorEvent) {
        let job_id = event.job_id.as_str();
        match event.event_type {
            EventType::JobStarted => {
                self.metrics.increment_job_started(job_id);
                info!(job_id, "Job started");
            }
            EventType::JobRetry => {
                let attempt = event.attempt().unwrap_or(0);
                self.metrics.increment_job_retry(job_id, attempt);
                warn!(job_id, attempt, "Job retry");
            }
            EventType::JobCompleted => {
                self.metrics.increment_job_completed(job_id, true);
                if let Some(duration) = event.duration() {
                    self.metrics.record_job_duration(job_id, duration);
                }
                info!(job_id, duration_ms = ?event.duration().map(|d| d.as_millis()), "Job completed");
            }
            EventType::JobFailed => {
                self.metrics.increment_job_completed(job_id, false);
                if let Some(duration) = event.duration() {
                    self.metrics.record_job_duration(job_id, duration);
                }
                self.alerts.trigger_alert(
                    AlertSeverity::Medium,
                    JOB_FAILED_ALERT,
                    job_id,
                    metadata_from(&event.data),
                );
                error!(job_id, data = %event.data, "Job failed");
            }
            EventType::OrphanedJob => {
                self.metrics.record_orphaned_job(job_id);
                self.alerts.trigger_alert(
                    AlertSeverity::High,
                    ORPHANED_JOB_ALERT,
                    job_id,
                    metadata_from(&event.data),
                );
                error!(job_id, data = %event.data, "Orphaned job detected");
            }
            EventType::SessionPaused => info!(job_id, "Session paused"),
            EventType::SessionResumed => info!(job_id, "Session resumed"),
            EventType::SessionStopped => info!(job_id, "Session stopped"),
        }
    }
}

fn metadata_from(data: &Value) -> HashMap<String, Value> {
    match data {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Null => HashMap::new(),
        other => HashMap::from([("data".to_owned(), other.clone())]),
    }
}

/// Background event dispatcher.
pub struct Monitor {
    processor: EventProcessor,
    handle: MonitorHandle,
    rx: Option<mpsc::Receiver<MonitorEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Construct a monitor with a bounded queue of `capacity` events.
    ///
    /// The consumer does not run until [`start`](Self::start) is called;
    /// events submitted before that are buffered (up to `capacity`).
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricsCollector>,
        alerts: Arc<dyn AlertManager>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            processor: EventProcessor { metrics, alerts },
            handle: MonitorHandle {
                tx,
                stats: Arc::new(PipelineStats::default()),
            },
            rx: Some(rx),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Producer handle for lifecycle code.
    #[must_use]
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Metrics collector this monitor writes to.
    #[must_use]
    pub fn metrics(&self) -> Arc<dyn MetricsCollector> {
        Arc::clone(&self.processor.metrics)
    }

    /// Alert registry this monitor writes to.
    #[must_use]
    pub fn alerts(&self) -> Arc<dyn AlertManager> {
        Arc::clone(&self.processor.alerts)
    }

    /// Enqueue an event; see [`MonitorHandle::log_event`].
    pub fn log_event(&self, event: MonitorEvent) -> bool {
        self.handle.log_event(event)
    }

    /// Number of events dropped so far.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.handle.dropped_events()
    }

    /// Spawn the background consumer. Must be called inside a Tokio runtime.
    ///
    /// Calling it again, or after [`stop`](Self::stop), does nothing.
    pub fn start(&mut self) {
        let Some(rx) = self.rx.take() else {
            debug!("monitor already started");
            return;
        };

        let processor = self.processor.clone();
        let stats = Arc::clone(&self.handle.stats);
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(run_consumer(rx, processor, stats, cancel)));
        info!("monitor started");
    }

    /// Stop accepting events, drain everything already queued, and wait for
    /// the consumer to exit. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.handle.stats.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!(%err, "monitor consumer task failed");
            }
        } else if let Some(mut rx) = self.rx.take() {
            // Never started: apply whatever was buffered inline.
            rx.close();
            while let Ok(event) = rx.try_recv() {
                process(&self.processor, &self.handle.stats, &event);
            }
        }
    }

    /// Wait until every accepted event has been processed.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let stats = &self.handle.stats;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = stats.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if stats.is_idle() {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return stats.is_idle();
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.handle.stats.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

fn process(processor: &EventProcessor, stats: &PipelineStats, event: &MonitorEvent) {
    processor.apply(event);
    stats.processed.fetch_add(1, Ordering::SeqCst);
    stats.progress.notify_waiters();
}

async fn run_consumer(
    mut rx: mpsc::Receiver<MonitorEvent>,
    processor: EventProcessor,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            maybe_event = rx.recv() => {
                if let Some(e) = maybe_event { e } else {
                    info!("monitor channel closed");
                    break;
                }
            }
            () = cancel.cancelled() => {
                info!("monitor shutting down");
                break;
            }
        };

        process(&processor, &stats, &event);
    }

    rx.close();
    let mut drained = 0_u64;
    while let Some(event) = rx.recv().await {
        process(&processor, &stats, &event);
        drained += 1;
    }
    debug!(drained, "monitor drained pending events");
}
