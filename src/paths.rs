//! Filesystem layout for daemon-global and per-project state.
//!
//! Global files live under `~/.sisyphus` (or `$SISYPHUS_HOME` when set).
//! Per-project files live under `<cwd>/.sisyphus`, one directory per session.

use std::env;
use std::path::{Path, PathBuf};

use crate::{AppError, Result};

const PROJECT_DIR: &str = ".sisyphus";

/// Root of the daemon-global directory.
///
/// # Errors
///
/// Returns `AppError::Config` if neither `SISYPHUS_HOME` nor `HOME` is set.
pub fn global_dir() -> Result<PathBuf> {
    if let Ok(custom) = env::var("SISYPHUS_HOME") {
        if !custom.is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }
    let home = env::var("HOME")
        .map_err(|_| AppError::Config("HOME is not set; cannot locate ~/.sisyphus".into()))?;
    Ok(PathBuf::from(home).join(PROJECT_DIR))
}

/// Default Unix socket path for the IPC server.
///
/// # Errors
///
/// Propagates [`global_dir`] failures.
pub fn socket_path() -> Result<PathBuf> {
    Ok(global_dir()?.join("daemon.sock"))
}

/// Daemon pidfile path.
///
/// # Errors
///
/// Propagates [`global_dir`] failures.
pub fn pid_path() -> Result<PathBuf> {
    Ok(global_dir()?.join("daemon.pid"))
}

/// Global daemon config path.
///
/// # Errors
///
/// Propagates [`global_dir`] failures.
pub fn global_config_path() -> Result<PathBuf> {
    Ok(global_dir()?.join("config.toml"))
}

/// Index of every working directory the daemon has hosted sessions for.
///
/// # Errors
///
/// Propagates [`global_dir`] failures.
pub fn known_projects_path() -> Result<PathBuf> {
    Ok(global_dir()?.join("projects.json"))
}

#[must_use]
pub fn project_dir(cwd: &Path) -> PathBuf {
    cwd.join(PROJECT_DIR)
}

#[must_use]
pub fn project_config_path(cwd: &Path) -> PathBuf {
    project_dir(cwd).join("config.toml")
}

/// Project-level orchestrator prompt override.
#[must_use]
pub fn project_orchestrator_prompt_path(cwd: &Path) -> PathBuf {
    project_dir(cwd).join("orchestrator.md")
}

#[must_use]
pub fn sessions_dir(cwd: &Path) -> PathBuf {
    project_dir(cwd).join("sessions")
}

#[must_use]
pub fn session_dir(cwd: &Path, session_id: &str) -> PathBuf {
    sessions_dir(cwd).join(session_id)
}

/// Canonical path of a session's state document.
#[must_use]
pub fn state_path(cwd: &Path, session_id: &str) -> PathBuf {
    session_dir(cwd, session_id).join("state.json")
}

#[must_use]
pub fn prompts_dir(cwd: &Path, session_id: &str) -> PathBuf {
    session_dir(cwd, session_id).join("prompts")
}

#[must_use]
pub fn reports_dir(cwd: &Path, session_id: &str) -> PathBuf {
    session_dir(cwd, session_id).join("reports")
}

#[must_use]
pub fn context_dir(cwd: &Path, session_id: &str) -> PathBuf {
    session_dir(cwd, session_id).join("context")
}

#[must_use]
pub fn plan_path(cwd: &Path, session_id: &str) -> PathBuf {
    session_dir(cwd, session_id).join("plan.md")
}

#[must_use]
pub fn logs_path(cwd: &Path, session_id: &str) -> PathBuf {
    session_dir(cwd, session_id).join("logs.md")
}

/// Directory holding isolated agent worktrees for a repository.
///
/// Placed next to the repository (not inside it) so worktree checkouts never
/// show up as untracked content of the integration branch.
#[must_use]
pub fn worktree_base_dir(cwd: &Path) -> PathBuf {
    let name = cwd
        .file_name()
        .map_or_else(|| "repo".to_owned(), |n| n.to_string_lossy().into_owned());
    let parent = cwd.parent().unwrap_or(cwd);
    parent.join(format!("{name}-worktrees"))
}

/// First eight characters of a session id, used in branch and pane labels.
#[must_use]
pub fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}
