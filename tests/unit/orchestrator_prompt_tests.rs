//! Unit tests for orchestrator prompt composition and state rendering.

use std::path::PathBuf;

use chrono::Utc;

use sisyphus::config::ProjectConfig;
use sisyphus::coordinator::orchestrator::{
    compose_user_prompt, format_state, load_system_prompt, DEFAULT_CONTINUATION,
};
use sisyphus::models::{
    Agent, AgentReport, AgentStatus, MergeStatus, OrchestratorCycle, ReportKind, Session, Task,
    TaskStatus,
};

fn agent(id: &str, status: AgentStatus) -> Agent {
    let mut agent = Agent::new(
        id.into(),
        format!("{id}-name"),
        "general".into(),
        "blue".into(),
        "work".into(),
        "%1".into(),
    );
    agent.status = status;
    agent
}

fn report(kind: ReportKind, summary: &str, path: &str) -> AgentReport {
    AgentReport {
        kind,
        file_path: PathBuf::from(path),
        summary: summary.into(),
        timestamp: Utc::now(),
    }
}

#[test]
fn resume_message_wins_over_carried_prompt() {
    let prompt = compose_user_prompt("<state></state>", Some("focus on docs"), Some("carried"));
    assert!(prompt.starts_with("<state></state>"));
    assert!(prompt.ends_with("The user resumed this session with new instructions: focus on docs"));
    assert!(!prompt.contains("carried"));
}

#[test]
fn carried_prompt_wins_over_default() {
    let prompt = compose_user_prompt("<state></state>", None, Some("run the benchmarks"));
    assert!(prompt.ends_with("run the benchmarks"));
    assert!(!prompt.contains(DEFAULT_CONTINUATION));
}

#[test]
fn default_continuation_when_nothing_else() {
    let prompt = compose_user_prompt("<state></state>", None, None);
    assert!(prompt.ends_with(DEFAULT_CONTINUATION));
}

#[test]
fn system_prompt_prefers_configured_then_project_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let builtin = load_system_prompt(dir.path(), &ProjectConfig::default());
    assert!(builtin.contains("Sisyphus Orchestrator"));

    std::fs::create_dir_all(dir.path().join(".sisyphus")).expect("mkdir");
    std::fs::write(dir.path().join(".sisyphus/orchestrator.md"), "project prompt").expect("write");
    assert_eq!(
        load_system_prompt(dir.path(), &ProjectConfig::default()),
        "project prompt"
    );

    std::fs::write(dir.path().join("custom.md"), "custom prompt").expect("write");
    let project = ProjectConfig {
        orchestrator_prompt: Some(PathBuf::from("custom.md")),
        ..ProjectConfig::default()
    };
    assert_eq!(load_system_prompt(dir.path(), &project), "custom prompt");
}

#[test]
fn empty_session_renders_placeholders() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = Session::new(
        "0123456789abcdef".into(),
        "build a parser".into(),
        dir.path().to_path_buf(),
    );
    let state = format_state(&session, false);

    assert!(state.starts_with("<state>\n"));
    assert!(state.ends_with("</state>"));
    assert!(state.contains("session: 01234567 (cycle 0)"));
    assert!(state.contains("task: build a parser"));
    assert!(state.contains("status: active"));
    assert!(state.contains("## Plan\n(empty)"));
    assert!(state.contains("## Agents\n  (none)"));
    assert!(state.contains("No [worktree] section"));
    assert!(!state.contains("## Worktrees"));
}

#[test]
fn state_lists_reports_cycles_tasks_and_merges() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = Session::new("s-1".into(), "task".into(), dir.path().to_path_buf());

    let mut done = agent("agent-001", AgentStatus::Completed);
    done.reports = vec![
        report(ReportKind::Update, "halfway", "/r/agent-001-001.md"),
        report(ReportKind::Update, "almost", "/r/agent-001-002.md"),
        report(ReportKind::Final, "finished parser", "/r/agent-001-final.md"),
    ];
    done.worktree_path = Some(PathBuf::from("/wt/agent-001"));
    done.branch_name = Some("sisyphus/s-1/agent-001".into());
    done.merge_status = Some(MergeStatus::Conflict);
    done.merge_details = Some("CONFLICT (content): src/lib.rs".into());

    let mut idle = agent("agent-002", AgentStatus::Lost);
    idle.worktree_path = Some(PathBuf::from("/wt/agent-002"));
    idle.branch_name = Some("sisyphus/s-1/agent-002".into());
    idle.merge_status = Some(MergeStatus::NoChanges);
    session.agents = vec![done, idle];

    let mut cycle = OrchestratorCycle::new(1, Some("%3".into()));
    cycle.completed_at = Some(Utc::now());
    cycle.agents_spawned = vec!["agent-001".into(), "agent-002".into()];
    session.orchestrator_cycles.push(cycle);
    session.tasks.push(Task {
        id: "t1".into(),
        description: "write lexer".into(),
        status: TaskStatus::InProgress,
    });

    let state = format_state(&session, true);
    assert!(state.contains("- agent-001 (agent-001-name): completed, 3 report(s)"));
    assert!(state.contains("[update 001] \"halfway\" -> /r/agent-001-001.md"));
    assert!(state.contains("[update 002] \"almost\" -> /r/agent-001-002.md"));
    assert!(state.contains("[final] \"finished parser\" -> /r/agent-001-final.md"));
    assert!(state.contains("- agent-001: CONFLICT: CONFLICT (content): src/lib.rs"));
    assert!(state.contains("Branch: sisyphus/s-1/agent-001"));
    assert!(state.contains("- agent-002: NO CHANGES"));
    assert!(state.contains("Cycle 1: Spawned agent-001, agent-002"));
    assert!(state.contains("- t1 [in_progress] write lexer"));
    assert!(state.contains("Worktree bootstrap is configured"));
}
