#![forbid(unsafe_code)]

//! `agent-supervisor`: operator CLI for agent sessions.
//!
//! Each subcommand maps onto one lifecycle operation and prints its result
//! as JSON. `supervise` keeps the monitor and reconciler running until
//! interrupted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use agent_supervisor::config::GlobalConfig;
use agent_supervisor::monitoring::{
    AlertManager, InMemoryAlertManager, InMemoryMetricsCollector, MetricsCollector, Monitor,
};
use agent_supervisor::orchestrator::{spawn_reconciler, SessionManager, SystemProcessController};
use agent_supervisor::persistence::SessionStore;
use agent_supervisor::{AppError, Result};

/// How often `supervise` checks for new alerts.
const ALERT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-supervisor", about = "Supervise coding-agent sessions", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the sessions directory from the configuration.
    #[arg(long)]
    sessions_dir: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session running COMMAND in WORKSPACE.
    Start {
        name: String,
        /// Free-text description of the task.
        #[arg(long, default_value = "")]
        goal: String,
        /// Working directory; created if missing.
        #[arg(long)]
        workspace: PathBuf,
        /// Program and arguments, after `--`.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Stop a session.
    Stop { name: String },
    /// Pause a running session.
    Pause { name: String },
    /// Resume a paused session.
    Resume { name: String },
    /// Report a session's outcome.
    Complete {
        name: String,
        /// Record the session as failed instead of completed.
        #[arg(long)]
        failed: bool,
    },
    /// List sessions (reconciling dead processes).
    List {
        /// List archived sessions instead.
        #[arg(long)]
        archived: bool,
    },
    /// Show one session record.
    Show { name: String },
    /// Move an ended session into the archive.
    Archive { name: String },
    /// Restore an archived session.
    Unarchive { name: String },
    /// Rename an ended session.
    Rename { old: String, new: String },
    /// Delete a session's record and log.
    Remove {
        name: String,
        /// Stop a live session before removing it.
        #[arg(long)]
        force: bool,
    },
    /// Reconcile one session against its process.
    Recover { name: String },
    /// Print `git diff --stat` for the session's workspace.
    DiffStat { name: String },
    /// Print the tail of a session log.
    Logs {
        name: String,
        /// Number of trailing lines; 0 prints everything.
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },
    /// Run the monitor and reconciler until interrupted.
    Supervise,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default_for_home(),
    };
    if let Some(dir) = args.sessions_dir {
        config.sessions_dir = dir;
    }
    let config = Arc::new(config);

    let store = SessionStore::open(&config)?;
    let metrics: Arc<dyn MetricsCollector> = Arc::new(InMemoryMetricsCollector::new());
    let alerts: Arc<dyn AlertManager> = Arc::new(InMemoryAlertManager::new());
    let mut monitor = Monitor::new(metrics, alerts, config.monitor.event_buffer);
    monitor.start();

    let manager = Arc::new(SessionManager::new(
        store,
        Arc::new(SystemProcessController::new(config.process.pause_signals)),
        monitor.handle(),
        config.stop_grace(),
    ));

    let outcome = match args.command {
        Command::Supervise => {
            supervise(&config, Arc::clone(&manager), &monitor)
                .instrument(tracing::info_span!("supervise"))
                .await
        }
        command => dispatch(command, &manager, &config).await,
    };

    monitor.stop().await;
    outcome
}

async fn dispatch(command: Command, manager: &SessionManager, config: &GlobalConfig) -> Result<()> {
    match command {
        Command::Start {
            name,
            goal,
            workspace,
            command,
        } => print_json(&manager.start_session(&name, &goal, command, workspace).await?),
        Command::Stop { name } => {
            manager.stop_session(&name).await?;
            // Keep the runtime alive long enough for kill escalation.
            tokio::time::sleep(config.stop_grace() + Duration::from_millis(100)).await;
            print_json(&manager.get_session(&name)?)
        }
        Command::Pause { name } => print_json(&manager.pause_session(&name).await?),
        Command::Resume { name } => print_json(&manager.resume_session(&name).await?),
        Command::Complete { name, failed } => {
            print_json(&manager.complete_session(&name, !failed).await?)
        }
        Command::List { archived: false } => print_json(&manager.list_sessions().await?),
        Command::List { archived: true } => print_json(&manager.list_archived_sessions()?),
        Command::Show { name } => print_json(&manager.get_session(&name)?),
        Command::Archive { name } => print_json(&manager.archive_session(&name).await?),
        Command::Unarchive { name } => print_json(&manager.unarchive_session(&name).await?),
        Command::Rename { old, new } => print_json(&manager.rename_session(&old, &new).await?),
        Command::Remove { name, force } => {
            manager.remove_session(&name, force).await?;
            if force {
                tokio::time::sleep(config.stop_grace() + Duration::from_millis(100)).await;
            }
            print_json(&serde_json::json!({ "removed": name }))
        }
        Command::Recover { name } => print_json(&manager.recover_session(&name).await?),
        Command::DiffStat { name } => {
            print!("{}", manager.get_session_git_diff_stat(&name).await?);
            Ok(())
        }
        Command::Logs { name, lines } => {
            println!("{}", manager.session_log_tail(&name, lines).await?);
            Ok(())
        }
        Command::Supervise => Ok(()),
    }
}

/// Run reconciliation and print alerts as they are raised.
async fn supervise(
    config: &GlobalConfig,
    manager: Arc<SessionManager>,
    monitor: &Monitor,
) -> Result<()> {
    // Catch anything that died while no supervisor was running.
    let sessions = manager.list_sessions().await?;
    info!(sessions = sessions.len(), "startup reconciliation complete");

    let ct = CancellationToken::new();
    let reconciler = config.reconcile.enabled.then(|| {
        spawn_reconciler(Arc::clone(&manager), config.reconcile_interval(), ct.clone())
    });

    let alerts = monitor.alerts();
    let mut seen = HashSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        for alert in alerts.get_active_alerts() {
            if seen.insert(alert.id.clone()) {
                print_json(&alert)?;
            }
        }

        tokio::select! {
            () = &mut shutdown => break,
            () = tokio::time::sleep(ALERT_POLL_INTERVAL) => {}
        }
    }

    info!("shutdown signal received");
    ct.cancel();
    if let Some(handle) = reconciler {
        if let Err(err) = handle.await {
            error!(%err, "reconciler task failed");
        }
    }

    for metrics in monitor.metrics().all_job_metrics() {
        info!(
            job_id = %metrics.job_id,
            started = metrics.start_count,
            succeeded = metrics.success_count,
            failed = metrics.failure_count,
            orphaned = metrics.is_orphaned,
            "job summary"
        );
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
