//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Process control settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Seconds between a stop request and forced kill of a lingering process.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Also deliver `SIGSTOP`/`SIGCONT` on pause/resume, in addition to the
    /// cooperative pause flag file.
    #[serde(default = "default_true")]
    pub pause_signals: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: default_stop_grace_seconds(),
            pause_signals: true,
        }
    }
}

/// Monitor event pipeline settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Capacity of the bounded event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

/// Background reconciliation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReconcileConfig {
    /// Whether the periodic reconciler runs under `supervise`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between reconciliation passes.
    #[serde(default = "default_reconcile_interval")]
    pub interval_seconds: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_reconcile_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_stop_grace_seconds() -> u64 {
    2
}

fn default_event_buffer() -> usize {
    1024
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_sessions_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agent-supervisor")
        .join("sessions")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root of the active-session partition; archived sessions live beneath it.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// Process control settings.
    #[serde(default)]
    pub process: ProcessConfig,
    /// Monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Reconciler settings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `$HOME/.agent-supervisor/sessions`.
    #[must_use]
    pub fn default_for_home() -> Self {
        Self::with_sessions_dir(default_sessions_dir())
    }

    /// Defaults rooted at an explicit sessions directory.
    #[must_use]
    pub fn with_sessions_dir(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            process: ProcessConfig::default(),
            monitor: MonitorConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }

    /// Directory holding active session records.
    #[must_use]
    pub fn active_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Directory holding archived session records.
    #[must_use]
    pub fn archived_dir(&self) -> PathBuf {
        self.sessions_dir.join("archived")
    }

    /// Directory holding markers for retired session names.
    #[must_use]
    pub fn tombstone_dir(&self) -> PathBuf {
        self.sessions_dir.join("tombstones")
    }

    /// Grace period before a stopped process is force-killed.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.process.stop_grace_seconds)
    }

    /// Interval between background reconciliation passes.
    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.monitor.event_buffer == 0 {
            return Err(AppError::Config(
                "monitor.event_buffer must be greater than zero".into(),
            ));
        }

        if self.reconcile.enabled && self.reconcile.interval_seconds == 0 {
            return Err(AppError::Config(
                "reconcile.interval_seconds must be greater than zero".into(),
            ));
        }

        if self.sessions_dir.as_os_str().is_empty() {
            return Err(AppError::Config("sessions_dir must not be empty".into()));
        }

        Ok(())
    }
}
