//! Daemon process lifecycle: pidfile lock and stop-with-deadline.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::{AppError, Result};

/// Exclusive claim on the pidfile, released on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Claim `path` for the current process.
    ///
    /// A pidfile naming a dead process (or garbage) is stale and overwritten.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Daemon` if a live process already holds the lock
    /// or the pidfile cannot be written.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(pid) = read_pid(path)? {
            if pid != std::process::id() && is_alive(pid) {
                return Err(AppError::Daemon(format!(
                    "daemon already running (pid {pid}); stop it first or remove {}",
                    path.display()
                )));
            }
            warn!(pid, path = %path.display(), "replacing stale pidfile");
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Daemon(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        fs::write(path, std::process::id().to_string())
            .map_err(|err| AppError::Daemon(format!("failed to write pidfile: {err}")))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        if matches!(read_pid(&self.path), Ok(Some(pid)) if pid == std::process::id()) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Pid recorded in `path`; `None` if absent or unparsable.
///
/// # Errors
///
/// Returns `AppError::Daemon` if the file exists but cannot be read.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().parse().ok().filter(|pid| *pid > 0)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Daemon(format!(
            "failed to read pidfile {}: {err}",
            path.display()
        ))),
    }
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM still means the process exists.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(nix::errno::Errno::EPERM))
}

#[cfg(not(unix))]
#[must_use]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No daemon was running.
    NotRunning,
    /// Exited after SIGTERM within the deadline.
    Graceful,
    /// Had to be killed with SIGKILL.
    Forced,
}

/// Stop the daemon named in `pid_path`: SIGTERM, wait up to `timeout`, then SIGKILL.
///
/// # Errors
///
/// Returns `AppError::Daemon` if signalling fails.
#[cfg(unix)]
pub async fn stop_daemon(pid_path: &Path, timeout: Duration) -> Result<StopOutcome> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = read_pid(pid_path)? else {
        return Ok(StopOutcome::NotRunning);
    };
    if !is_alive(pid) {
        let _ = fs::remove_file(pid_path);
        return Ok(StopOutcome::NotRunning);
    }
    let target = Pid::from_raw(
        i32::try_from(pid).map_err(|_| AppError::Daemon(format!("invalid pid {pid}")))?,
    );

    kill(target, Signal::SIGTERM)
        .map_err(|err| AppError::Daemon(format!("failed to signal pid {pid}: {err}")))?;
    info!(pid, "sent SIGTERM");

    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(StopOutcome::Graceful);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    warn!(pid, "daemon did not stop in time; sending SIGKILL");
    match kill(target, Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => {
            return Err(AppError::Daemon(format!(
                "failed to kill pid {pid}: {err}"
            )))
        }
    }
    let _ = fs::remove_file(pid_path);
    Ok(StopOutcome::Forced)
}

/// Stopping by signal is unix-only.
///
/// # Errors
///
/// Always returns `AppError::Daemon`.
#[cfg(not(unix))]
pub async fn stop_daemon(_pid_path: &Path, _timeout: Duration) -> Result<StopOutcome> {
    Err(AppError::Daemon(
        "stopping the daemon by signal is only supported on unix".into(),
    ))
}
