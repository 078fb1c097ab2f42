//! Agent process control.
//!
//! Spawns one subprocess per session with stdout/stderr appended to the
//! session log, probes liveness, and delivers stop/pause/resume signals.
//! Liveness compares the start time the OS reports for a pid against the
//! token recorded at spawn, so a recycled pid is not mistaken for the
//! original agent.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::{debug, info, info_span, warn};

use crate::{AppError, Result};

/// Environment variable carrying the session name.
pub const ENV_SESSION_NAME: &str = "AGENT_SESSION_NAME";
/// Environment variable carrying the agent state file path.
pub const ENV_STATE_FILE: &str = "AGENT_STATE_FILE";
/// Environment variable carrying the cooperative pause flag path.
pub const ENV_PAUSE_FILE: &str = "AGENT_PAUSE_FILE";

/// Signals the lifecycle manager can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Polite termination request (`SIGTERM`).
    Terminate,
    /// Forced termination (`SIGKILL`).
    Kill,
    /// Pause request.
    Pause,
    /// Resume request.
    Resume,
}

/// Everything needed to launch an agent process.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Session name, exported to the agent.
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory.
    pub workspace: PathBuf,
    /// File receiving stdout and stderr.
    pub log_file: PathBuf,
    /// Where the agent writes its own telemetry.
    pub state_file: PathBuf,
    /// Flag file whose presence asks the agent to pause.
    pub pause_file: PathBuf,
}

/// Identity of a launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    /// OS process id.
    pub pid: u32,
    /// OS-reported start time, when available.
    pub start_token: Option<u64>,
}

/// Process operations used by the lifecycle manager.
pub trait ProcessController: Send + Sync {
    /// Launch the agent described by `request`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Environment` if the program cannot be resolved or
    /// the process fails to start.
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess>;

    /// Whether `pid` is alive and, if a token is given, still the same process.
    fn is_process_running(&self, pid: u32, start_token: Option<u64>) -> bool;

    /// Deliver `kind` to `pid`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Signal` if delivery fails. A vanished process is
    /// not an error for `Terminate` and `Kill`.
    fn signal(&self, pid: u32, kind: SignalKind) -> Result<()>;
}

/// [`ProcessController`] backed by real OS processes.
#[derive(Debug, Clone)]
pub struct SystemProcessController {
    pause_signals: bool,
}

impl SystemProcessController {
    /// Create a controller. With `pause_signals` set, pause and resume also
    /// deliver `SIGSTOP`/`SIGCONT` in addition to the cooperative flag.
    #[must_use]
    pub fn new(pause_signals: bool) -> Self {
        Self { pause_signals }
    }
}

impl Default for SystemProcessController {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ProcessController for SystemProcessController {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        let span = info_span!("spawn_agent", session = %request.name);
        let _guard = span.enter();

        let Some((program, args)) = request.command.split_first() else {
            return Err(AppError::Environment("command is empty".into()));
        };
        let program = resolve_program(program, &request.workspace)?;

        let open_log = || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&request.log_file)
                .map_err(|err| {
                    AppError::Environment(format!(
                        "failed to open log file {}: {err}",
                        request.log_file.display()
                    ))
                })
        };
        let stdout = open_log()?;
        let stderr = open_log()?;

        let mut child = Command::new(&program)
            .args(args)
            .current_dir(&request.workspace)
            .env(ENV_SESSION_NAME, &request.name)
            .env(ENV_STATE_FILE, &request.state_file)
            .env(ENV_PAUSE_FILE, &request.pause_file)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|err| {
                AppError::Environment(format!(
                    "failed to spawn {}: {err}",
                    program.display()
                ))
            })?;

        let Some(pid) = child.id() else {
            return Err(AppError::Environment(
                "spawned process exited before its pid could be read".into(),
            ));
        };
        let start_token = process_start_time(pid);

        info!(pid, program = %program.display(), "agent process spawned");

        // Reap the child so an exited agent never lingers as a zombie.
        let name = request.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(session = %name, pid, %status, "agent process exited"),
                Err(err) => warn!(session = %name, pid, %err, "failed to wait on agent process"),
            }
        });

        Ok(SpawnedProcess { pid, start_token })
    }

    fn is_process_running(&self, pid: u32, start_token: Option<u64>) -> bool {
        if pid == 0 {
            return false;
        }

        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing(),
        );

        let Some(process) = system.process(sys_pid) else {
            return false;
        };

        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            debug!(pid, "process is a zombie");
            return false;
        }

        match (start_token, process.start_time()) {
            (Some(expected), observed) if observed != 0 && observed != expected => {
                debug!(pid, expected, observed, "pid reused by a different process");
                false
            }
            _ => true,
        }
    }

    fn signal(&self, pid: u32, kind: SignalKind) -> Result<()> {
        if matches!(kind, SignalKind::Pause | SignalKind::Resume) && !self.pause_signals {
            debug!(pid, ?kind, "pause signals disabled; relying on pause flag");
            return Ok(());
        }
        send_signal(pid, kind)
    }
}

/// OS-reported start time of `pid`, used as its identity token.
#[must_use]
pub fn process_start_time(pid: u32) -> Option<u64> {
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(sys_pid)
        .map(sysinfo::Process::start_time)
        .filter(|t| *t != 0)
}

#[cfg(unix)]
fn send_signal(pid: u32, kind: SignalKind) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Signal(format!("pid {pid} is out of range")))?;
    if raw <= 0 {
        return Err(AppError::Signal(format!("refusing to signal pid {pid}")));
    }

    let signal = match kind {
        SignalKind::Terminate => Signal::SIGTERM,
        SignalKind::Kill => Signal::SIGKILL,
        SignalKind::Pause => Signal::SIGSTOP,
        SignalKind::Resume => Signal::SIGCONT,
    };

    match kill(NixPid::from_raw(raw), signal) {
        Ok(()) => {
            debug!(pid, ?signal, "signal delivered");
            Ok(())
        }
        Err(Errno::ESRCH) if matches!(kind, SignalKind::Terminate | SignalKind::Kill) => {
            debug!(pid, ?signal, "process already gone");
            Ok(())
        }
        Err(errno) => Err(AppError::Signal(format!(
            "failed to send {signal} to pid {pid}: {errno}"
        ))),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, kind: SignalKind) -> Result<()> {
    Err(AppError::Signal(format!(
        "{kind:?} for pid {pid} is not supported on this platform"
    )))
}

/// Resolve the program to an absolute, existing path.
///
/// Paths containing a separator are taken relative to the workspace;
/// bare names are looked up on `PATH`.
fn resolve_program(program: &str, workspace: &Path) -> Result<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            workspace.join(candidate)
        };
        return if path.is_file() {
            Ok(path)
        } else {
            Err(AppError::Environment(format!(
                "program {} does not exist",
                path.display()
            )))
        };
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
        .ok_or_else(|| AppError::Environment(format!("program '{program}' not found on PATH")))
}
