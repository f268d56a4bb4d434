//! Git worktree isolation for agents.
//!
//! Each isolated agent gets its own branch, `sisyphus/<session8>/<agent-id>`,
//! checked out in a worktree under the repository's sibling
//! `<name>-worktrees/<session8>/<agent-id>` directory. After the agents finish,
//! [`merge`] folds every pending branch back into the integration branch with
//! a merge commit, or aborts and records the conflict.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::WorktreeConfig;
use crate::models::{Agent, MergeStatus};
use crate::paths;
use crate::{AppError, Result};

const SNAPSHOT_MESSAGE: &str = "sisyphus: snapshot session state before merge";

/// A freshly created worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Checkout directory the agent runs in.
    pub path: PathBuf,
    /// Branch checked out there.
    pub branch: String,
}

/// Outcome of merging one agent branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub agent_id: String,
    pub name: String,
    /// `Merged`, `NoChanges` or `Conflict`.
    pub status: MergeStatus,
    /// Conflict output from git, when the merge failed.
    pub details: Option<String>,
}

/// Deterministic branch name for an agent.
#[must_use]
pub fn branch_name(session_id: &str, agent_id: &str) -> String {
    format!("sisyphus/{}/{agent_id}", paths::short_id(session_id))
}

/// Session-scoped checkout path, so sessions reusing agent ids never collide.
#[must_use]
pub fn worktree_path(cwd: &Path, session_id: &str, agent_id: &str) -> PathBuf {
    paths::worktree_base_dir(cwd)
        .join(paths::short_id(session_id))
        .join(agent_id)
}

async fn git_raw(cwd: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| AppError::Git(format!("failed to run git: {err}")))
}

/// Run git and return trimmed stdout; a non-zero exit is an error.
async fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = git_raw(cwd, args).await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    } else {
        Err(AppError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Run git, logging instead of failing.
async fn git_best_effort(cwd: &Path, args: &[&str]) -> Option<String> {
    match git(cwd, args).await {
        Ok(out) => Some(out),
        Err(err) => {
            debug!(%err, "best-effort git command failed");
            None
        }
    }
}

/// Create the branch and worktree for an agent. Does not bootstrap.
///
/// Stale worktree metadata is pruned and any leftover checkout or branch
/// with the same name is removed first.
///
/// # Errors
///
/// Returns `AppError::Git` if the branch or worktree cannot be created.
pub async fn create(cwd: &Path, session_id: &str, agent_id: &str) -> Result<WorktreeInfo> {
    let branch = branch_name(session_id, agent_id);
    let path = worktree_path(cwd, session_id, agent_id);
    let span = info_span!("worktree_create", session_id, agent_id, %branch);

    async move {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                AppError::Io(format!("failed to create {}: {err}", parent.display()))
            })?;
        }

        git_best_effort(cwd, &["worktree", "prune"]).await;
        let path_str = path.to_string_lossy();
        if path.exists() {
            git_best_effort(cwd, &["worktree", "remove", "--force", &path_str]).await;
        }
        git_best_effort(cwd, &["branch", "-D", &branch]).await;

        git(cwd, &["branch", &branch, "HEAD"]).await?;
        git(cwd, &["worktree", "add", &path_str, &branch]).await?;

        info!(path = %path.display(), "worktree created");
        Ok(WorktreeInfo {
            path: path.clone(),
            branch: branch.clone(),
        })
    }
    .instrument(span)
    .await
}

/// Apply copy / clone / symlink / init steps to a new worktree.
///
/// Every step is best-effort: failures are logged and the next step runs.
pub async fn bootstrap(cwd: &Path, worktree: &Path, config: &WorktreeConfig) {
    let span = info_span!("worktree_bootstrap", worktree = %worktree.display());
    async move {
        for entry in &config.copy {
            let (src, dest) = bootstrap_paths(cwd, worktree, entry).await;
            run_best_effort("cp", &["-r", &src, &dest], None).await;
        }

        for entry in &config.clone {
            let (src, dest) = bootstrap_paths(cwd, worktree, entry).await;
            // Copy-on-write where the platform supports it, deep copy otherwise.
            if !run_best_effort("cp", &["-Rc", &src, &dest], None).await {
                run_best_effort("cp", &["-r", &src, &dest], None).await;
            }
        }

        for entry in &config.symlink {
            let (src, dest) = bootstrap_paths(cwd, worktree, entry).await;
            #[cfg(unix)]
            if let Err(err) = tokio::fs::symlink(&src, &dest).await {
                warn!(%src, %dest, %err, "worktree symlink failed");
            }
            #[cfg(not(unix))]
            warn!(%src, %dest, "worktree symlinks are only supported on unix");
        }

        if let Some(init) = config.init.as_deref().filter(|c| !c.trim().is_empty()) {
            if run_best_effort("sh", &["-c", init], Some(worktree)).await {
                info!("worktree init command finished");
            } else {
                warn!(init, "worktree init command failed");
            }
        }
    }
    .instrument(span)
    .await;
}

async fn bootstrap_paths(cwd: &Path, worktree: &Path, entry: &str) -> (String, String) {
    let dest = worktree.join(entry);
    if let Some(parent) = dest.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            warn!(dir = %parent.display(), %err, "failed to create bootstrap dir");
        }
    }
    (
        cwd.join(entry).to_string_lossy().into_owned(),
        dest.to_string_lossy().into_owned(),
    )
}

async fn run_best_effort(program: &str, args: &[&str], dir: Option<&Path>) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    match cmd.output().await {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            debug!(
                program,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "bootstrap step failed"
            );
            false
        }
        Err(err) => {
            debug!(program, %err, "bootstrap step could not start");
            false
        }
    }
}

/// Find the branch checked out at `worktree` in `git worktree list --porcelain` output.
///
/// Returns `None` if the worktree is absent or has a detached HEAD.
#[must_use]
pub fn parse_porcelain_branch(porcelain: &str, worktree: &Path) -> Option<String> {
    let target = normalize(worktree);
    let mut in_block = false;
    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if in_block {
                return None;
            }
            in_block = normalize(Path::new(path)) == target;
            continue;
        }
        if !in_block {
            continue;
        }
        if line.is_empty() {
            return None;
        }
        if let Some(branch) = line.strip_prefix("branch refs/heads/") {
            return Some(branch.to_owned());
        }
    }
    None
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Branch actually checked out in `worktree`, as git reports it.
pub async fn resolve_worktree_branch(cwd: &Path, worktree: &Path) -> Option<String> {
    let porcelain = git_best_effort(cwd, &["worktree", "list", "--porcelain"]).await?;
    parse_porcelain_branch(&porcelain, worktree)
}

/// Merge every agent whose merge status is pending.
///
/// Session housekeeping under `.sisyphus` is committed first so it never
/// shows up as a conflict. Merged and unchanged branches are cleaned up;
/// conflicting ones are aborted and left in place.
pub async fn merge(cwd: &Path, agents: &[Agent]) -> Vec<MergeResult> {
    let pending: Vec<&Agent> = agents.iter().filter(|a| a.merge_pending()).collect();
    if pending.is_empty() {
        return Vec::new();
    }

    let span = info_span!("worktree_merge", cwd = %cwd.display(), pending = pending.len());
    async move {
        git_best_effort(cwd, &["add", ".sisyphus"]).await;
        git_best_effort(cwd, &["commit", "-m", SNAPSHOT_MESSAGE]).await;

        let mut results = Vec::with_capacity(pending.len());
        for agent in pending {
            let Some(path) = agent.worktree_path.as_deref() else {
                continue;
            };
            results.push(merge_one(cwd, agent, path).await);
        }
        results
    }
    .instrument(span)
    .await
}

async fn merge_one(cwd: &Path, agent: &Agent, path: &Path) -> MergeResult {
    let result = |status, details| MergeResult {
        agent_id: agent.id.clone(),
        name: agent.name.clone(),
        status,
        details,
    };

    let Some(branch) = resolve_worktree_branch(cwd, path).await else {
        info!(agent_id = %agent.id, "worktree branch unresolvable; treating as no changes");
        cleanup(cwd, path, None).await;
        return result(MergeStatus::NoChanges, None);
    };

    let range = format!("HEAD..{branch}");
    let ahead = git_best_effort(cwd, &["log", &range, "--oneline"]).await;
    if ahead.as_deref().map_or(true, str::is_empty) {
        info!(agent_id = %agent.id, %branch, "no commits to merge");
        cleanup(cwd, path, Some(&branch)).await;
        return result(MergeStatus::NoChanges, None);
    }

    let message = format!("sisyphus: merge {} ({})", agent.id, agent.name);
    match git_raw(cwd, &["merge", "--no-ff", &branch, "-m", &message]).await {
        Ok(output) if output.status.success() => {
            info!(agent_id = %agent.id, %branch, "branch merged");
            cleanup(cwd, path, Some(&branch)).await;
            result(MergeStatus::Merged, None)
        }
        Ok(output) => {
            git_best_effort(cwd, &["merge", "--abort"]).await;
            // git reports conflicting files on stdout.
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            let details = if stdout.is_empty() { stderr } else { stdout };
            warn!(agent_id = %agent.id, %branch, "merge conflict; worktree kept");
            result(MergeStatus::Conflict, Some(details))
        }
        Err(err) => {
            warn!(agent_id = %agent.id, %err, "merge could not run");
            result(MergeStatus::Conflict, Some(err.to_string()))
        }
    }
}

/// Remove a worktree and its branch, then the session directory if empty.
pub async fn cleanup(cwd: &Path, worktree: &Path, branch: Option<&str>) {
    let path_str = worktree.to_string_lossy();
    git_best_effort(cwd, &["worktree", "remove", "--force", &path_str]).await;
    if let Some(branch) = branch {
        git_best_effort(cwd, &["branch", "-D", branch]).await;
    }

    if let Some(parent) = worktree.parent() {
        let empty = std::fs::read_dir(parent).is_ok_and(|mut entries| entries.next().is_none());
        if empty {
            if let Err(err) = tokio::fs::remove_dir(parent).await {
                debug!(dir = %parent.display(), %err, "could not remove worktree dir");
            }
        }
    }
}
