//! Session lifecycle management.
//!
//! Every mutation of a session record goes through [`SessionManager`],
//! serialized per session name. Readers (`list_*`, `load_session`) do not
//! lock; the store's atomic renames keep them consistent.
//!
//! Listing doubles as crash recovery: a `Running`/`Paused` record whose
//! process is gone is moved to `Error` and reported as an orphaned job.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::event::{EventType, MonitorEvent};
use crate::models::session::{pause_flag_path, validate_session_name, SessionState, SessionStatus};
use crate::monitoring::MonitorHandle;
use crate::persistence::{Partition, SessionStore};
use crate::{AppError, Result};

use super::git;
use super::locks::NameLocks;
use super::process::{ProcessController, SignalKind, SpawnRequest};

/// Reason recorded on sessions whose agent reported failure.
const AGENT_FAILURE_REASON: &str = "agent reported failure";

/// Owns the session state machine.
pub struct SessionManager {
    store: SessionStore,
    process: Arc<dyn ProcessController>,
    monitor: MonitorHandle,
    locks: NameLocks,
    stop_grace: Duration,
}

impl SessionManager {
    /// Build a manager over its collaborators.
    ///
    /// `stop_grace` is how long a stopped process gets before it is killed.
    #[must_use]
    pub fn new(
        store: SessionStore,
        process: Arc<dyn ProcessController>,
        monitor: MonitorHandle,
        stop_grace: Duration,
    ) -> Self {
        Self {
            store,
            process,
            monitor,
            locks: NameLocks::new(),
            stop_grace,
        }
    }

    /// Underlying session store.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Launch a new session.
    ///
    /// Creates `workspace` if needed, spawns `command` inside it with output
    /// sent to the session log, and persists the `Running` record.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidName` for a malformed name.
    /// - `AppError::Conflict` if the name is active, archived or retired.
    /// - `AppError::Environment` if the workspace cannot be created or the
    ///   process cannot be spawned. Nothing is persisted in that case.
    pub async fn start_session(
        &self,
        name: &str,
        goal: &str,
        command: Vec<String>,
        workspace: impl AsRef<Path>,
    ) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("start_session", session = name);

        async move {
            let _lock = self.locks.lock(name).await;

            if self.store.exists_active(name) {
                return Err(AppError::Conflict(format!(
                    "session '{name}' already exists"
                )));
            }
            if self.store.exists_archived(name) {
                return Err(AppError::Conflict(format!(
                    "session '{name}' exists in the archive"
                )));
            }
            if self.store.is_retired(name) {
                return Err(AppError::Conflict(format!(
                    "session name '{name}' was used before and cannot be reused"
                )));
            }
            if command.is_empty() {
                return Err(AppError::Environment("command is empty".into()));
            }

            let workspace = prepare_workspace(workspace.as_ref())?;
            let log_file = self.store.log_path(Partition::Active, name);
            fs::write(&log_file, b"").map_err(|err| {
                AppError::Environment(format!(
                    "failed to create log file {}: {err}",
                    log_file.display()
                ))
            })?;
            remove_pause_flag(&pause_flag_path(&workspace));

            let start_commit_sha = git::current_commit_sha(&workspace).await;

            let mut state = SessionState::new_running(
                name.to_owned(),
                goal.to_owned(),
                command,
                workspace,
                log_file,
                0,
                None,
            );
            let request = SpawnRequest {
                name: name.to_owned(),
                command: state.command.clone(),
                workspace: state.workspace.clone(),
                log_file: state.log_file.clone(),
                state_file: state.agent_state_file.clone(),
                pause_file: state.pause_flag_path(),
            };

            let spawned = match self.process.spawn(&request) {
                Ok(spawned) => spawned,
                Err(err) => {
                    discard_file(&state.log_file);
                    return Err(err);
                }
            };
            state.pid = spawned.pid;
            state.process_start_token = spawned.start_token;
            state.start_commit_sha = start_commit_sha;

            if let Err(err) = self.store.save(&state) {
                warn!(pid = spawned.pid, %err, "failed to persist new session; killing process");
                if let Err(kill_err) = self.process.signal(spawned.pid, SignalKind::Kill) {
                    warn!(pid = spawned.pid, %kill_err, "failed to kill unpersisted process");
                }
                discard_file(&state.log_file);
                return Err(err);
            }

            self.monitor.log_event(MonitorEvent::job_started(name));
            info!(pid = state.pid, workspace = %state.workspace.display(), "session started");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Ask a session's process to terminate and mark the session `Stopped`.
    ///
    /// Returns as soon as the termination signal is sent. If the same
    /// process is still alive after the grace period it is killed. Stopping
    /// a session that already ended does nothing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions or
    /// `AppError::Signal` if the termination signal cannot be delivered.
    pub async fn stop_session(&self, name: &str) -> Result<()> {
        validate_session_name(name)?;
        let span = info_span!("stop_session", session = name);

        async move {
            let _lock = self.locks.lock(name).await;
            let state = self.store.load(name)?;
            self.stop_locked(state).await.map(|_| ())
        }
        .instrument(span)
        .await
    }

    /// Pause a running session.
    ///
    /// Writes the cooperative pause flag into the workspace and, when
    /// configured, suspends the process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` unless the session is `Running`, or the
    /// error from signal delivery (the flag is withdrawn again).
    pub async fn pause_session(&self, name: &str) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("pause_session", session = name);

        async move {
            let _lock = self.locks.lock(name).await;
            let mut state = self.store.load(name)?;
            if state.status != SessionStatus::Running {
                return Err(AppError::Conflict(format!(
                    "session '{name}' cannot be paused while {}",
                    state.status
                )));
            }

            let flag = state.pause_flag_path();
            fs::write(&flag, b"").map_err(|err| {
                AppError::Io(format!("failed to write pause flag {}: {err}", flag.display()))
            })?;

            if let Err(err) = self.process.signal(state.pid, SignalKind::Pause) {
                remove_pause_flag(&flag);
                return Err(err);
            }

            state.transition_to(SessionStatus::Paused)?;
            self.store.save(&state)?;
            self.monitor
                .log_event(MonitorEvent::new(EventType::SessionPaused, name, json!({ "pid": state.pid })));
            info!(pid = state.pid, "session paused");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Resume a paused session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` unless the session is `Paused`, or the
    /// error from signal delivery.
    pub async fn resume_session(&self, name: &str) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("resume_session", session = name);

        async move {
            let _lock = self.locks.lock(name).await;
            let mut state = self.store.load(name)?;
            if state.status != SessionStatus::Paused {
                return Err(AppError::Conflict(format!(
                    "session '{name}' cannot be resumed while {}",
                    state.status
                )));
            }

            self.process.signal(state.pid, SignalKind::Resume)?;
            remove_pause_flag(&state.pause_flag_path());

            state.transition_to(SessionStatus::Running)?;
            self.store.save(&state)?;
            self.monitor
                .log_event(MonitorEvent::new(EventType::SessionResumed, name, json!({ "pid": state.pid })));
            info!(pid = state.pid, "session resumed");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Record the outcome an agent (or operator) reports for a session.
    ///
    /// A live session moves to `Completed` on success or `Error` on failure,
    /// emitting `job_completed` or `job_failed` with its run time. A session
    /// that already ended is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions or
    /// `AppError::Conflict` for a session that never started.
    pub async fn complete_session(&self, name: &str, success: bool) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("complete_session", session = name, success);

        async move {
            let _lock = self.locks.lock(name).await;
            let mut state = self.store.load(name)?;
            if state.status.is_terminal() || state.status == SessionStatus::Archived {
                debug!(status = %state.status, "session already ended");
                return Ok(state);
            }

            let (pid, token) = (state.pid, state.process_start_token);
            if state.status.is_live() && self.process.is_process_running(pid, token) {
                if state.status == SessionStatus::Paused {
                    if let Err(err) = self.process.signal(pid, SignalKind::Resume) {
                        warn!(pid, %err, "failed to resume process before termination");
                    }
                }
                match self.process.signal(pid, SignalKind::Terminate) {
                    Ok(()) => self.schedule_kill(pid, token),
                    Err(err) => warn!(pid, %err, "failed to terminate completed session's process"),
                }
            }
            remove_pause_flag(&state.pause_flag_path());

            let next = if success {
                SessionStatus::Completed
            } else {
                SessionStatus::Error
            };
            state.transition_to(next)?;
            if !success {
                state.error = Some(AGENT_FAILURE_REASON.to_owned());
            }
            state.end_commit_sha = git::current_commit_sha(&state.workspace).await;
            self.store.save(&state)?;

            let duration = state.run_duration();
            let event = if success {
                MonitorEvent::job_completed(name, duration)
            } else {
                MonitorEvent::job_failed(name, duration, AGENT_FAILURE_REASON)
            };
            self.monitor.log_event(event);

            info!(status = %state.status, elapsed_ms = duration.as_millis(), "session completed");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Active sessions, reconciled against live processes.
    ///
    /// Any `Running`/`Paused` session whose process is gone becomes `Error`
    /// and an `orphaned_job` event is emitted before the list is returned.
    /// An `Archived` record stranded in the active partition is moved to
    /// the archive and left out.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the sessions directory cannot be read.
    pub async fn list_sessions(&self) -> Result<Vec<SessionState>> {
        let listed = self.store.list_active()?;
        let mut sessions = Vec::with_capacity(listed.len());

        for state in listed {
            if !self.needs_reconcile(&state) {
                sessions.push(state);
                continue;
            }

            let name = state.name.clone();
            let _lock = self.locks.lock(&name).await;
            match self.reconcile_locked(&name).await {
                Ok(Some(state)) => sessions.push(state),
                Ok(None) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(session = %name, %err, "failed to reconcile session");
                    if state.status != SessionStatus::Archived {
                        sessions.push(state);
                    }
                }
            }
        }

        Ok(sessions)
    }

    /// Reconcile one session on demand, e.g. after the supervisor restarts.
    ///
    /// Returns the session's current record, from the archive if that is
    /// where it lives.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is in neither partition.
    pub async fn recover_session(&self, name: &str) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("recover_session", session = name);

        async move {
            let _lock = self.locks.lock(name).await;
            match self.reconcile_locked(name).await {
                Ok(Some(state)) => Ok(state),
                Ok(None) => self.store.load_archived(name),
                Err(err) if err.is_not_found() => self.store.load_archived(name),
                Err(err) => Err(err),
            }
        }
        .instrument(span)
        .await
    }

    /// Move an ended session into the archive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` for live sessions or when an archived
    /// session of the same name exists, `AppError::NotFound` otherwise
    /// missing.
    pub async fn archive_session(&self, name: &str) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("archive_session", session = name);

        async move {
            let _lock = self.locks.lock(name).await;
            let state = self.store.load(name)?;
            if state.status.is_live() || state.status == SessionStatus::Pending {
                return Err(AppError::Conflict(format!(
                    "session '{name}' is {}; stop it before archiving",
                    state.status
                )));
            }
            self.store.archive(name)
        }
        .instrument(span)
        .await
    }

    /// Bring an archived session back into the active partition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if it is not archived or
    /// `AppError::Conflict` if an active session holds the name.
    pub async fn unarchive_session(&self, name: &str) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("unarchive_session", session = name);

        async move {
            let _lock = self.locks.lock(name).await;
            self.store.unarchive(name)
        }
        .instrument(span)
        .await
    }

    /// Archived sessions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the archive directory cannot be read.
    pub fn list_archived_sessions(&self) -> Result<Vec<SessionState>> {
        self.store.list_archived()
    }

    /// Rename an ended session. The old name is retired.
    ///
    /// # Errors
    ///
    /// - `AppError::Conflict` if `new` is active, archived or retired, or the
    ///   session is still live.
    /// - `AppError::NotFound` if `old` is not an active session.
    pub async fn rename_session(&self, old: &str, new: &str) -> Result<SessionState> {
        validate_session_name(old)?;
        validate_session_name(new)?;
        let span = info_span!("rename_session", from = old, to = new);

        async move {
            if old == new {
                return Err(AppError::Conflict(format!(
                    "session '{old}' already has that name"
                )));
            }

            let _lock = self.locks.lock_pair(old, new).await;
            let state = self.store.load(old)?;
            if state.status.is_live() {
                return Err(AppError::Conflict(format!(
                    "session '{old}' is {} (pid {}); stop it before renaming",
                    state.status, state.pid
                )));
            }
            self.store.rename(old, new)
        }
        .instrument(span)
        .await
    }

    /// Delete a session's record and log.
    ///
    /// A live session is refused unless `force` is set, in which case it is
    /// stopped first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` for a live session without `force`, or
    /// `AppError::NotFound` if the session does not exist.
    pub async fn remove_session(&self, name: &str, force: bool) -> Result<()> {
        validate_session_name(name)?;
        let span = info_span!("remove_session", session = name, force);

        async move {
            let _lock = self.locks.lock(name).await;
            let state = self.store.load(name)?;
            if state.status.is_live() {
                if !force {
                    return Err(AppError::Conflict(format!(
                        "session '{name}' is {} (pid {}); use force to remove it",
                        state.status, state.pid
                    )));
                }
                self.stop_locked(state).await?;
            }

            self.store.remove(name)
        }
        .instrument(span)
        .await
    }

    /// `git diff --stat` of the session's work since it started.
    ///
    /// Empty when the workspace is not a git checkout or no start commit was
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions or `AppError::Git`
    /// if git fails inside a checkout.
    pub async fn get_session_git_diff_stat(&self, name: &str) -> Result<String> {
        let state = self.get_session(name)?;
        let Some(start) = state.start_commit_sha.as_deref() else {
            return Ok(String::new());
        };
        git::diff_stat(&state.workspace, Some(start), state.end_commit_sha.as_deref()).await
    }

    /// Active session record, without reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if there is no such active session.
    pub fn load_session(&self, name: &str) -> Result<SessionState> {
        self.store.load(name)
    }

    /// Path of the session's log file (active or archived).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions.
    pub fn session_log_path(&self, name: &str) -> Result<PathBuf> {
        self.get_session(name).map(|state| state.log_file)
    }

    /// Last `lines` lines of the session log; `0` returns the whole log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions or `AppError::Io`
    /// if the log cannot be read.
    pub async fn session_log_tail(&self, name: &str, lines: usize) -> Result<String> {
        let path = self.session_log_path(name)?;
        let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
            AppError::Io(format!("failed to read log file {}: {err}", path.display()))
        })?;
        Ok(tail_lines(&content, lines))
    }

    /// Liveness probe for a bare pid.
    #[must_use]
    pub fn is_process_running(&self, pid: u32) -> bool {
        self.process.is_process_running(pid, None)
    }

    /// Session record from the active partition, or the archive if it is
    /// not active.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is in neither partition.
    pub fn get_session(&self, name: &str) -> Result<SessionState> {
        match self.store.load(name) {
            Err(err) if err.is_not_found() => self.store.load_archived(name),
            other => other,
        }
    }

    fn needs_reconcile(&self, state: &SessionState) -> bool {
        state.status == SessionStatus::Archived
            || (state.status.is_live()
                && !self
                    .process
                    .is_process_running(state.pid, state.process_start_token))
    }

    /// Re-check one active record under its name lock.
    ///
    /// Returns `None` when the record was moved to the archive.
    async fn reconcile_locked(&self, name: &str) -> Result<Option<SessionState>> {
        let mut state = self.store.load(name)?;

        if state.status == SessionStatus::Archived {
            info!(session = name, "completing interrupted archive");
            self.store.archive(name)?;
            return Ok(None);
        }

        if !state.status.is_live()
            || self
                .process
                .is_process_running(state.pid, state.process_start_token)
        {
            return Ok(Some(state));
        }

        let pid = state.pid;
        state.transition_to(SessionStatus::Error)?;
        state.error = Some(format!("process {pid} is no longer running"));
        state.end_commit_sha = git::current_commit_sha(&state.workspace).await;
        remove_pause_flag(&state.pause_flag_path());
        self.store.save(&state)?;

        self.monitor.log_event(MonitorEvent::orphaned_job(name, pid));
        warn!(session = name, pid, "orphaned session marked as error");
        Ok(Some(state))
    }

    /// Stop a session whose name lock the caller holds.
    async fn stop_locked(&self, mut state: SessionState) -> Result<SessionState> {
        if state.status.is_terminal() || state.status == SessionStatus::Archived {
            debug!(session = %state.name, status = %state.status, "session already ended");
            return Ok(state);
        }

        let (pid, token) = (state.pid, state.process_start_token);
        if state.status.is_live() {
            if state.status == SessionStatus::Paused {
                if let Err(err) = self.process.signal(pid, SignalKind::Resume) {
                    warn!(pid, %err, "failed to resume paused process before stopping");
                }
            }
            self.process.signal(pid, SignalKind::Terminate)?;
            self.schedule_kill(pid, token);
        }
        remove_pause_flag(&state.pause_flag_path());

        state.transition_to(SessionStatus::Stopped)?;
        state.end_commit_sha = git::current_commit_sha(&state.workspace).await;
        self.store.save(&state)?;

        self.monitor.log_event(MonitorEvent::new(
            EventType::SessionStopped,
            state.name.clone(),
            json!({ "pid": pid }),
        ));
        info!(session = %state.name, pid, "session stopped");
        Ok(state)
    }

    /// Kill `pid` after the grace period if it is still the same process.
    fn schedule_kill(&self, pid: u32, token: Option<u64>) {
        if pid == 0 {
            return;
        }
        let process = Arc::clone(&self.process);
        let grace = self.stop_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if process.is_process_running(pid, token) {
                warn!(pid, grace_ms = grace.as_millis(), "process ignored termination; killing");
                if let Err(err) = process.signal(pid, SignalKind::Kill) {
                    warn!(pid, %err, "failed to kill process");
                }
            }
        });
    }
}

/// Create the workspace directory and return its canonical path.
fn prepare_workspace(workspace: &Path) -> Result<PathBuf> {
    if workspace.exists() && !workspace.is_dir() {
        return Err(AppError::Environment(format!(
            "workspace {} exists and is not a directory",
            workspace.display()
        )));
    }
    fs::create_dir_all(workspace).map_err(|err| {
        AppError::Environment(format!(
            "failed to create workspace {}: {err}",
            workspace.display()
        ))
    })?;
    fs::canonicalize(workspace).map_err(|err| {
        AppError::Environment(format!(
            "failed to resolve workspace {}: {err}",
            workspace.display()
        ))
    })
}

fn remove_pause_flag(flag: &Path) {
    if let Err(err) = fs::remove_file(flag) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %flag.display(), %err, "failed to remove pause flag");
        }
    }
}

fn discard_file(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), %err, "failed to clean up file");
        }
    }
}

/// Last `lines` lines of `content`; `0` keeps everything.
fn tail_lines(content: &str, lines: usize) -> String {
    if lines == 0 {
        return content.to_owned();
    }
    let all: Vec<&str> = content.trim_end().lines().collect();
    if all.len() <= lines {
        return content.to_owned();
    }
    all[all.len() - lines..].join("\n")
}
