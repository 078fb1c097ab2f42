//! Alert model for the monitor's alert registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Alert severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational.
    Low,
    /// Needs attention eventually.
    Medium,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
}

/// A registry entry describing a condition an operator should look at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Alert {
    /// Unique alert identifier.
    pub id: String,
    /// Urgency.
    pub severity: AlertSeverity,
    /// Human-readable summary.
    pub message: String,
    /// Job or session the alert refers to.
    pub job_id: String,
    /// Free-form context.
    pub metadata: HashMap<String, Value>,
    /// Whether the alert has been cleared.
    pub cleared: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the alert was cleared.
    pub cleared_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Construct a new active alert with a generated identifier.
    #[must_use]
    pub fn new(
        severity: AlertSeverity,
        message: String,
        job_id: String,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            severity,
            message,
            job_id,
            metadata,
            cleared: false,
            created_at: Utc::now(),
            cleared_at: None,
        }
    }
}
