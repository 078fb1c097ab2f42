//! Periodic crash reconciliation.
//!
//! Runs the same pass as [`SessionManager::list_sessions`] on a timer so an
//! agent that dies between operator commands is still reported.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::session::SessionStatus;

use super::session_manager::SessionManager;

/// Spawn the reconciliation loop. It runs one pass per `interval` until
/// `cancel` fires.
#[must_use]
pub fn spawn_reconciler(
    manager: Arc<SessionManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            info!(interval_secs = interval.as_secs(), "session reconciler started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("session reconciler shutting down");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {}
                }

                match manager.list_sessions().await {
                    Ok(sessions) => {
                        let live = sessions.iter().filter(|s| s.status.is_live()).count();
                        let failed = sessions
                            .iter()
                            .filter(|s| s.status == SessionStatus::Error)
                            .count();
                        debug!(total = sessions.len(), live, failed, "reconciliation pass complete");
                    }
                    Err(err) => warn!(%err, "reconciliation pass failed"),
                }
            }
        }
        .instrument(info_span!("session_reconciler")),
    )
}
