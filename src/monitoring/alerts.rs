//! Severity-tagged alert registry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::models::alert::{Alert, AlertSeverity};

/// Mutable registry of alerts.
///
/// Alerts never expire on their own; clearing is the only way out of the
/// active set.
pub trait AlertManager: Send + Sync {
    /// Record a new alert and return its identifier. Identical alerts are
    /// not merged.
    fn trigger_alert(
        &self,
        severity: AlertSeverity,
        message: &str,
        job_id: &str,
        metadata: HashMap<String, Value>,
    ) -> String;

    /// Mark an alert cleared. Unknown or already-cleared ids are ignored.
    fn clear_alert(&self, alert_id: &str);

    /// Alerts not yet cleared, oldest first.
    fn get_active_alerts(&self) -> Vec<Alert>;

    /// Every alert ever triggered, oldest first.
    fn list_alerts(&self) -> Vec<Alert>;

    /// Look up a single alert.
    fn get_alert(&self, alert_id: &str) -> Option<Alert>;
}

/// Process-local [`AlertManager`].
#[derive(Debug, Default)]
pub struct InMemoryAlertManager {
    alerts: Mutex<Vec<Alert>>,
}

impl InMemoryAlertManager {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alerts(&self) -> MutexGuard<'_, Vec<Alert>> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AlertManager for InMemoryAlertManager {
    fn trigger_alert(
        &self,
        severity: AlertSeverity,
        message: &str,
        job_id: &str,
        metadata: HashMap<String, Value>,
    ) -> String {
        let alert = Alert::new(severity, message.to_owned(), job_id.to_owned(), metadata);
        let id = alert.id.clone();
        info!(alert_id = %id, ?severity, job_id, message, "alert triggered");
        self.alerts().push(alert);
        id
    }

    fn clear_alert(&self, alert_id: &str) {
        let mut alerts = self.alerts();
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) if !alert.cleared => {
                alert.cleared = true;
                alert.cleared_at = Some(Utc::now());
                info!(alert_id, job_id = %alert.job_id, "alert cleared");
            }
            Some(_) => debug!(alert_id, "alert already cleared"),
            None => debug!(alert_id, "clear requested for unknown alert"),
        }
    }

    fn get_active_alerts(&self) -> Vec<Alert> {
        self.alerts()
            .iter()
            .filter(|a| !a.cleared)
            .cloned()
            .collect()
    }

    fn list_alerts(&self) -> Vec<Alert> {
        self.alerts().clone()
    }

    fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        self.alerts().iter().find(|a| a.id == alert_id).cloned()
    }
}
