#![forbid(unsafe_code)]

//! `sisyphusd`: session-coordination daemon.
//!
//! Bootstraps configuration, recovers sessions left by a previous run, and
//! starts the IPC server, the pane health monitor and the retention task.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use sisyphus::coordinator::{spawn_health_monitor, AppState, SessionCoordinator};
use sisyphus::daemon::{self, PidLock, StopOutcome};
use sisyphus::driver::TmuxDriver;
use sisyphus::ipc::spawn_ipc_server;
use sisyphus::persistence::{retention, KnownProjects, StateStore};
use sisyphus::{paths, AppError, DaemonConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sisyphusd", about = "Session-coordination daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (default: ~/.sisyphus/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daemon in the foreground (default).
    Run,
    /// Stop a running daemon.
    Stop,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let config_path = match args.config {
        Some(ref path) => path.clone(),
        None => paths::global_config_path()?,
    };
    let config = DaemonConfig::load_from_path(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Daemon(format!("failed to build tokio runtime: {err}")))?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => runtime.block_on(run(config)),
        Command::Stop => runtime.block_on(stop(&config)),
    }
}

async fn stop(config: &DaemonConfig) -> Result<()> {
    match daemon::stop_daemon(&paths::pid_path()?, config.stop_timeout()).await? {
        StopOutcome::NotRunning => info!("daemon is not running"),
        StopOutcome::Graceful => info!("daemon stopped"),
        StopOutcome::Forced => info!("daemon force-killed after timeout"),
    }
    Ok(())
}

async fn run(config: DaemonConfig) -> Result<()> {
    info!("sisyphusd bootstrap");
    let global = paths::global_dir()?;
    std::fs::create_dir_all(&global)
        .map_err(|err| AppError::Io(format!("cannot create {}: {err}", global.display())))?;
    let _pid_lock = PidLock::acquire(&paths::pid_path()?)?;

    let socket_path = config.socket_path()?;
    let retention_days = config.retention_days;
    let projects = Arc::new(KnownProjects::load(paths::known_projects_path()?));
    let store = StateStore::default();

    let state = Arc::new(AppState::new(
        config,
        store.clone(),
        Arc::new(TmuxDriver::default()),
        Arc::clone(&projects),
    ));
    let coordinator = SessionCoordinator::new(state);

    // ── Recover sessions from a previous run ────────────
    coordinator.recover_on_startup().await;

    // ── Start background services ───────────────────────
    let ct = CancellationToken::new();
    let ipc_handle = spawn_ipc_server(coordinator.clone(), &socket_path, ct.clone())?;
    let monitor_handle = spawn_health_monitor(coordinator.clone(), ct.clone());
    let retention_handle =
        retention::spawn_retention_task(store, projects, retention_days, ct.clone());
    info!("daemon ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let (ipc, monitor, retention) = tokio::join!(ipc_handle, monitor_handle, retention_handle);
    for (task, result) in [("ipc", ipc), ("monitor", monitor), ("retention", retention)] {
        if let Err(err) = result {
            error!(task, %err, "background task ended abnormally");
        }
    }
    info!("sisyphusd shut down");
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
    let subscriber = fmt().with_env_filter(env_filter);

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
