//! Unit tests for `JobRecord` idempotent execution.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_supervisor::models::job::{JobRecord, JobStatus};
use agent_supervisor::monitoring::{
    AlertManager, InMemoryAlertManager, InMemoryMetricsCollector, MetricsCollector, Monitor,
};
use agent_supervisor::AppError;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn completed_job_does_not_run_again() {
    let job = JobRecord::new("build");
    let runs = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        let runs = Arc::clone(&runs);
        job.execute(&cancel, || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .expect("execute");
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(job.execution_count(), 1);
    assert_eq!(job.status(), JobStatus::Completed);
}

#[tokio::test]
async fn failed_job_returns_recorded_error_without_rerunning() {
    let job = JobRecord::new("deploy");
    let cancel = CancellationToken::new();

    let first = job
        .execute(&cancel, || async { Err(AppError::Environment("no network".into())) })
        .await;
    let second = job.execute(&cancel, || async { Ok(()) }).await;

    assert_eq!(first, Err(AppError::Environment("no network".into())));
    assert_eq!(second, first);
    assert_eq!(job.execution_count(), 1);
    assert_eq!(job.status(), JobStatus::Failed);
}

#[tokio::test]
async fn retry_resets_to_pending_and_allows_another_run() {
    let job = JobRecord::new("flaky");
    let cancel = CancellationToken::new();

    let _ = job
        .execute(&cancel, || async { Err(AppError::Io("timeout".into())) })
        .await;
    job.retry(1);
    assert_eq!(job.status(), JobStatus::Pending);

    job.execute(&cancel, || async { Ok(()) }).await.expect("second attempt");
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.execution_count(), 2);
    assert!(job.last_error().is_none());
}

#[tokio::test]
async fn cancellation_returns_job_to_pending() {
    let job = JobRecord::new("slow");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = job
        .execute(&cancel, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(AppError::Cancelled(_))));
    assert_eq!(job.status(), JobStatus::Pending);
}

#[tokio::test]
async fn concurrent_dispatch_is_rejected_while_running() {
    let job = Arc::new(JobRecord::new("long"));
    let cancel = CancellationToken::new();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let runner = {
        let job = Arc::clone(&job);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            job.execute(&cancel, || async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            })
            .await
        })
    };

    started_rx.await.expect("work started");
    let second = job.execute(&cancel, || async { Ok(()) }).await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let _ = release_tx.send(());
    runner.await.expect("join").expect("first run");
    assert_eq!(job.execution_count(), 1);
}

#[test]
fn set_status_is_last_write_wins() {
    let job = JobRecord::new("j");
    let sequence = [
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Pending,
        JobStatus::Completed,
        JobStatus::Running,
    ];
    for status in sequence {
        job.set_status(status);
    }
    assert_eq!(job.status(), JobStatus::Running);
}

#[tokio::test]
async fn executions_are_reported_to_the_monitor() {
    let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::new());
    let alerts: Arc<dyn AlertManager> = Arc::new(InMemoryAlertManager::new());
    let mut monitor = Monitor::new(Arc::clone(&metrics), alerts, 32);
    monitor.start();

    let job = JobRecord::new("reported").with_monitor(monitor.handle());
    let cancel = CancellationToken::new();
    let _ = job
        .execute(&cancel, || async { Err(AppError::Io("boom".into())) })
        .await;
    job.retry(1);
    job.execute(&cancel, || async { Ok(()) }).await.expect("retry succeeds");
    job.execute(&cancel, || async { Ok(()) }).await.expect("no-op");

    assert!(monitor.wait_idle(Duration::from_secs(5)).await);
    let snapshot = metrics.get_job_metrics("reported");
    assert_eq!(snapshot.start_count, 2);
    assert_eq!(snapshot.failure_count, 1);
    assert_eq!(snapshot.success_count, 1);
    assert_eq!(snapshot.retry_count, 1);

    monitor.stop().await;
}
