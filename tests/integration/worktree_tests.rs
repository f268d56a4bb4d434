//! Integration tests for agent worktree isolation against a real git binary.
//!
//! Each test builds a throwaway repository and is skipped when `git` is not
//! available on the host.

use std::path::{Path, PathBuf};
use std::process::Command;

use sisyphus::config::WorktreeConfig;
use sisyphus::models::{Agent, AgentStatus, MergeStatus};
use sisyphus::worktree;

const SESSION: &str = "5e55101d-0000-4000-8000-000000000000";

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// A repository at `<tmp>/repo` with one commit on `main`.
fn init_repo() -> (tempfile::TempDir, PathBuf) {
    let root = tempfile::tempdir().expect("tempdir");
    let repo = root.path().canonicalize().expect("canonical").join("repo");
    std::fs::create_dir_all(&repo).expect("mkdir");
    git(&repo, &["init", "-q"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(&repo, &["config", "user.email", "dev@example.com"]);
    git(&repo, &["config", "user.name", "Dev"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join("shared.txt"), "base\n").expect("write");
    std::fs::write(repo.join(".env"), "TOKEN=1\n").expect("write");
    git(&repo, &["add", "shared.txt"]);
    git(&repo, &["commit", "-q", "-m", "initial"]);
    (root, repo)
}

fn isolated_agent(id: &str, info: &worktree::WorktreeInfo) -> Agent {
    let mut agent = Agent::new(
        id.into(),
        format!("{id}-name"),
        "dev".into(),
        "blue".into(),
        "i".into(),
        "%1".into(),
    );
    agent.status = AgentStatus::Completed;
    agent.worktree_path = Some(info.path.clone());
    agent.branch_name = Some(info.branch.clone());
    agent.merge_status = Some(MergeStatus::Pending);
    agent
}

fn commit_in(dir: &Path, file: &str, body: &str) {
    std::fs::write(dir.join(file), body).expect("write");
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", &format!("edit {file}")]);
}

#[tokio::test]
async fn create_checks_out_session_scoped_branch() {
    if !git_available() {
        return;
    }
    let (_root, repo) = init_repo();

    let info = worktree::create(&repo, SESSION, "agent-001").await.expect("create");
    assert_eq!(info.branch, "sisyphus/5e55101d/agent-001");
    assert_eq!(info.path, worktree::worktree_path(&repo, SESSION, "agent-001"));
    assert!(info.path.join("shared.txt").is_file());
    assert_eq!(
        git(&info.path, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "sisyphus/5e55101d/agent-001"
    );
    assert_eq!(
        worktree::resolve_worktree_branch(&repo, &info.path).await.as_deref(),
        Some("sisyphus/5e55101d/agent-001")
    );

    // Re-creating replaces the leftover checkout and branch.
    let again = worktree::create(&repo, SESSION, "agent-001").await.expect("recreate");
    assert_eq!(again, info);
}

#[tokio::test]
async fn bootstrap_copies_and_runs_init() {
    if !git_available() {
        return;
    }
    let (_root, repo) = init_repo();
    let info = worktree::create(&repo, SESSION, "agent-001").await.expect("create");

    let config = WorktreeConfig {
        copy: vec![".env".into()],
        clone: Vec::new(),
        symlink: vec!["missing-dir".into()],
        init: Some("echo ready > init.txt".into()),
    };
    worktree::bootstrap(&repo, &info.path, &config).await;

    assert_eq!(
        std::fs::read_to_string(info.path.join(".env")).expect("copied"),
        "TOKEN=1\n"
    );
    assert_eq!(
        std::fs::read_to_string(info.path.join("init.txt")).expect("init ran"),
        "ready\n"
    );
}

#[tokio::test]
async fn merge_outcomes_are_reported_per_agent() {
    if !git_available() {
        return;
    }
    let (_root, repo) = init_repo();

    let idle = worktree::create(&repo, SESSION, "agent-001").await.expect("create");
    let clean = worktree::create(&repo, SESSION, "agent-002").await.expect("create");
    let clash = worktree::create(&repo, SESSION, "agent-003").await.expect("create");

    commit_in(&clean.path, "feature.txt", "new feature\n");
    commit_in(&clash.path, "shared.txt", "agent version\n");
    commit_in(&repo, "shared.txt", "main version\n");

    let mut settled = isolated_agent("agent-004", &idle);
    settled.merge_status = Some(MergeStatus::Merged);
    let agents = vec![
        isolated_agent("agent-001", &idle),
        isolated_agent("agent-002", &clean),
        isolated_agent("agent-003", &clash),
        settled,
    ];
    let results = worktree::merge(&repo, &agents).await;
    assert_eq!(results.len(), 3);

    let by_id = |id: &str| results.iter().find(|r| r.agent_id == id).expect("result");
    assert_eq!(by_id("agent-001").status, MergeStatus::NoChanges);
    assert_eq!(by_id("agent-002").status, MergeStatus::Merged);
    let conflict = by_id("agent-003");
    assert_eq!(conflict.status, MergeStatus::Conflict);
    assert!(conflict
        .details
        .as_deref()
        .is_some_and(|d| d.contains("shared.txt")));

    // Merged work landed with a merge commit; the conflict was aborted.
    assert!(repo.join("feature.txt").is_file());
    assert_eq!(
        std::fs::read_to_string(repo.join("shared.txt")).expect("read"),
        "main version\n"
    );
    assert!(git(&repo, &["log", "-1", "--format=%s"]).starts_with("sisyphus: merge agent-002"));
    assert!(!git(&repo, &["status", "--porcelain"]).contains("shared.txt"));

    // Merged and unchanged worktrees are gone; the conflicting one stays.
    assert!(!idle.path.exists());
    assert!(!clean.path.exists());
    assert!(clash.path.exists());
    assert!(git(&repo, &["branch", "--list", &clean.branch]).is_empty());
    assert!(!git(&repo, &["branch", "--list", &clash.branch]).is_empty());
}

#[tokio::test]
async fn merge_without_pending_agents_is_a_no_op() {
    let repo = Path::new("/nonexistent/repo");
    assert!(worktree::merge(repo, &[]).await.is_empty());
}
