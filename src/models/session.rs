//! Session model and lifecycle helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Current on-disk encoding version of [`SessionState`].
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Lifecycle status for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created but its process has not been launched.
    Pending,
    /// Backing process is running.
    Running,
    /// Backing process was asked to pause.
    Paused,
    /// Session stopped by an operator.
    Stopped,
    /// Agent reported successful completion.
    Completed,
    /// Agent failed or its process vanished.
    Error,
    /// Session moved to the archived partition.
    Archived,
}

impl SessionStatus {
    /// Whether a backing process is expected to exist in this status.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether the status is one of the end states a session can be archived from.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Error)
    }

    /// Lowercase label used in log fields and CLI output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one agent session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionState {
    /// Encoding version of this record.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Unique session name; also the record's file stem.
    pub name: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// OS process id; zero when no backing process exists.
    #[serde(default)]
    pub pid: u32,
    /// OS-reported process start time captured at spawn.
    #[serde(default)]
    pub process_start_token: Option<u64>,
    /// Command line the process was launched with.
    #[serde(default)]
    pub command: Vec<String>,
    /// Free-text description of the task.
    #[serde(default)]
    pub goal: String,
    /// Session launch timestamp.
    pub start_time: DateTime<Utc>,
    /// Set once, on the transition into a terminal status.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Combined stdout/stderr log of the process.
    pub log_file: PathBuf,
    /// Telemetry file the agent maintains inside its workspace.
    pub agent_state_file: PathBuf,
    /// Git-tracked checkout the agent works in.
    pub workspace: PathBuf,
    /// Reason recorded on the transition into `Error`.
    #[serde(default)]
    pub error: Option<String>,
    /// Workspace HEAD when the session started.
    #[serde(default)]
    pub start_commit_sha: Option<String>,
    /// Workspace HEAD when the session ended.
    #[serde(default)]
    pub end_commit_sha: Option<String>,
    /// Terminal status held before archival; restored on unarchive.
    #[serde(default)]
    pub archived_from: Option<SessionStatus>,
}

fn default_schema_version() -> u32 {
    SESSION_SCHEMA_VERSION
}

impl SessionState {
    /// Construct a running session record for a freshly spawned process.
    #[must_use]
    pub fn new_running(
        name: String,
        goal: String,
        command: Vec<String>,
        workspace: PathBuf,
        log_file: PathBuf,
        pid: u32,
        process_start_token: Option<u64>,
    ) -> Self {
        let agent_state_file = workspace.join(".agent_state.json");
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            name,
            status: SessionStatus::Running,
            pid,
            process_start_token,
            command,
            goal,
            start_time: Utc::now(),
            end_time: None,
            log_file,
            agent_state_file,
            workspace,
            error: None,
            start_commit_sha: None,
            end_commit_sha: None,
            archived_from: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::{Archived, Completed, Error, Paused, Pending, Running, Stopped};
        matches!(
            (self.status, next),
            (Pending, Running | Stopped | Error)
                | (Running, Paused | Stopped | Completed | Error)
                | (Paused, Running | Stopped | Completed | Error)
                | (Stopped | Completed | Error, Archived)
        )
    }

    /// Apply a transition, enforcing the state machine and the
    /// pid/end-time invariants.
    ///
    /// Entering a terminal status clears the pid and start token and stamps
    /// `end_time`, which is never overwritten afterwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the transition is not permitted.
    pub fn transition_to(&mut self, next: SessionStatus) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "session '{}' cannot move from {} to {next}",
                self.name, self.status
            )));
        }

        if next.is_terminal() {
            self.pid = 0;
            self.process_start_token = None;
            if self.end_time.is_none() {
                self.end_time = Some(Utc::now());
            }
        }

        if next == SessionStatus::Archived {
            self.archived_from = Some(self.status);
        }

        self.status = next;
        Ok(())
    }

    /// Elapsed run time, up to `end_time` or now for live sessions.
    #[must_use]
    pub fn run_duration(&self) -> std::time::Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }

    /// Path of the cooperative pause flag inside the workspace.
    #[must_use]
    pub fn pause_flag_path(&self) -> PathBuf {
        pause_flag_path(&self.workspace)
    }
}

/// Path of the cooperative pause flag for a workspace.
#[must_use]
pub fn pause_flag_path(workspace: &std::path::Path) -> PathBuf {
    workspace.join(".agent_paused")
}

/// Validate that a session name is safe to use as a file stem.
///
/// # Errors
///
/// Returns `AppError::InvalidName` for empty names, `.`/`..`, or names
/// containing anything other than ASCII alphanumerics, `-`, `_` and `.`.
pub fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::InvalidName("session name cannot be empty".into()));
    }

    if name == "." || name == ".." {
        return Err(AppError::InvalidName(format!(
            "'{name}' is a reserved path component"
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(AppError::InvalidName(format!(
            "'{name}' contains disallowed character {bad:?}"
        )));
    }

    Ok(())
}
