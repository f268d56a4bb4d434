//! Integration tests for the session lifecycle through the coordinator:
//! start, spawn, report, submit, yield, complete, kill and resume.

use sisyphus::coordinator::session_manager::KILLED_BY_USER;
use sisyphus::errors::NotFoundKind;
use sisyphus::models::{AgentStatus, ReportKind, SessionStatus};
use sisyphus::paths;

use super::test_helpers::{harness, harness_with_delay, WINDOW};

#[tokio::test]
async fn start_spawns_first_orchestrator_cycle() {
    let h = harness();
    let session = h.start("build a parser").await;

    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.tmux_session_name.as_deref(), Some("main"));
    assert_eq!(session.tmux_window_id.as_deref(), Some(WINDOW));
    assert_eq!(session.orchestrator_cycles.len(), 1);
    let cycle = &session.orchestrator_cycles[0];
    assert_eq!(cycle.cycle, 1);
    assert!(cycle.completed_at.is_none());

    let pane = cycle.pane_id.clone().expect("orchestrator pane");
    assert!(h.driver.is_alive(&pane));
    let sent = h.driver.sent_to(&pane);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(&format!("SISYPHUS_SESSION_ID='{}'", session.id)));
    assert!(sent[0].contains("SISYPHUS_AGENT_ID='orchestrator'"));
    assert_eq!(
        h.driver.title_of(&pane),
        Some(format!("orchestrator ({})", paths::short_id(&session.id)))
    );

    let prompts = paths::prompts_dir(&h.cwd, &session.id);
    assert!(prompts.join("orchestrator-system-1.md").is_file());
    let user = std::fs::read_to_string(prompts.join("orchestrator-user-1.md")).expect("prompt");
    assert!(user.contains("task: build a parser"));

    assert!(h.coordinator.monitor().is_tracked(&session.id));
    let index = std::fs::read_to_string(h.home.join("projects.json")).expect("project index");
    assert!(index.contains(&*h.cwd.to_string_lossy()));
}

#[tokio::test]
async fn spawned_agents_get_sequential_ids_and_records() {
    let h = harness();
    let session = h.start("task").await;

    let first = h.spawn(&session.id, "lexer").await;
    let second = h.spawn(&session.id, "parser").await;
    assert_eq!(first, "agent-001");
    assert_eq!(second, "agent-002");

    let session = h.read(&session.id);
    assert_eq!(session.agents.len(), 2);
    let agent = &session.agents[0];
    assert_eq!(agent.status, AgentStatus::Running);
    assert_eq!(agent.agent_type, "dev");
    assert_ne!(agent.color, session.agents[1].color);
    assert_eq!(
        session.orchestrator_cycles[0].agents_spawned,
        vec!["agent-001", "agent-002"]
    );

    let sent = h.driver.sent_to(&agent.pane_id);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("SISYPHUS_AGENT_ID='agent-001'"));
    assert!(sent[0].contains("'--agent' 'dev'"));
    assert_eq!(h.driver.title_of(&agent.pane_id).as_deref(), Some("lexer (agent-001)"));

    let instruction = paths::prompts_dir(&h.cwd, &session.id).join("agent-001-instruction.md");
    assert_eq!(
        std::fs::read_to_string(instruction).expect("instruction"),
        "lexer instructions"
    );
}

#[tokio::test]
async fn reports_are_appended_without_status_change() {
    let h = harness();
    let session = h.start("task").await;
    let agent_id = h.spawn(&session.id, "worker").await;

    h.coordinator
        .report(&session.id, &agent_id, "halfway there\nmore detail")
        .await
        .expect("report");

    let session = h.read(&session.id);
    let agent = &session.agents[0];
    assert_eq!(agent.status, AgentStatus::Running);
    assert_eq!(agent.reports.len(), 1);
    assert_eq!(agent.reports[0].kind, ReportKind::Update);
    assert_eq!(agent.reports[0].summary, "halfway there");
    assert!(agent.reports[0].file_path.ends_with("agent-001-001.md"));
    assert_eq!(
        std::fs::read_to_string(&agent.reports[0].file_path).expect("report body"),
        "halfway there\nmore detail"
    );

    let err = h
        .coordinator
        .report(&session.id, "agent-099", "x")
        .await
        .unwrap_err();
    assert!(err.is_not_found(NotFoundKind::Agent));
}

#[tokio::test]
async fn submit_completes_agent_and_closes_its_pane() {
    let h = harness();
    let session = h.start("task").await;
    let first = h.spawn(&session.id, "a").await;
    let second = h.spawn(&session.id, "b").await;

    let all_done = h
        .coordinator
        .submit(&session.id, &first, "finished a")
        .await
        .expect("submit");
    assert!(!all_done);

    let doc = h.read(&session.id);
    let agent = doc.find_agent(&first).expect("agent");
    assert_eq!(agent.status, AgentStatus::Completed);
    assert!(agent.has_final_report());
    assert!(agent.reports[0].file_path.ends_with("agent-001-final.md"));
    assert!(!h.driver.is_alive(&agent.pane_id));

    let again = h
        .coordinator
        .submit(&session.id, &first, "twice")
        .await
        .unwrap_err();
    assert!(again.to_string().contains("not running"));

    let all_done = h
        .coordinator
        .submit(&session.id, &second, "finished b")
        .await
        .expect("submit");
    assert!(all_done);
}

#[tokio::test]
async fn yield_closes_cycle_and_kills_orchestrator_pane() {
    let h = harness();
    let session = h.start("task").await;
    h.spawn(&session.id, "worker").await;
    let pane = h.orchestrator_pane(&session.id);

    h.coordinator
        .yield_cycle(&session.id, Some("check the worker".into()))
        .await
        .expect("yield");

    let doc = h.read(&session.id);
    assert!(doc.open_cycle().is_none());
    assert_eq!(
        doc.orchestrator_cycles[0].next_prompt.as_deref(),
        Some("check the worker")
    );
    assert!(!h.driver.is_alive(&pane));
    // An agent is still running, so nothing is respawned.
    assert!(!h.coordinator.respawn_pending(&session.id));
    assert_eq!(doc.orchestrator_cycles.len(), 1);
}

#[tokio::test]
async fn complete_finishes_session_and_rejects_further_work() {
    let h = harness();
    let session = h.start("task").await;
    let pane = h.orchestrator_pane(&session.id);

    h.coordinator
        .complete(&session.id, "shipped")
        .await
        .expect("complete");

    let doc = h.read(&session.id);
    assert_eq!(doc.status, SessionStatus::Completed);
    assert_eq!(doc.completion_report.as_deref(), Some("shipped"));
    assert!(doc.completed_at.is_some());
    assert!(doc.orchestrator_cycles[0].completed_at.is_some());
    assert!(!h.driver.is_alive(&pane));
    assert!(!h.coordinator.monitor().is_tracked(&session.id));

    let err = h
        .coordinator
        .spawn_agent(&session.id, "dev", "late", "too late", false)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("invalid state"));
    assert!(h.coordinator.complete(&session.id, "again").await.is_err());
}

#[tokio::test]
async fn kill_tears_everything_down() {
    let h = harness();
    let session = h.start("task").await;
    h.spawn(&session.id, "a").await;
    h.spawn(&session.id, "b").await;

    let killed = h.coordinator.kill(&session.id).await.expect("kill");
    assert_eq!(killed, 2);

    let doc = h.read(&session.id);
    assert_eq!(doc.status, SessionStatus::Completed);
    for agent in &doc.agents {
        assert_eq!(agent.status, AgentStatus::Killed);
        assert_eq!(agent.killed_reason.as_deref(), Some(KILLED_BY_USER));
    }
    assert!(doc.open_cycle().is_none());
    assert_eq!(h.driver.killed_windows(), vec![WINDOW.to_owned()]);
    assert!(!h.coordinator.monitor().is_tracked(&session.id));

    let err = h.coordinator.kill(&session.id).await.unwrap_err();
    assert!(err.to_string().contains("already completed"));
}

#[tokio::test]
async fn resume_demotes_vanished_agents_and_prefers_message() {
    let h = harness_with_delay(5_000);
    let session = h.start("task").await;
    let agent_id = h.spawn(&session.id, "worker").await;
    let agent_pane = h.read(&session.id).agents[0].pane_id.clone();

    // Orchestrator yields with a carried prompt, then everything dies.
    h.coordinator
        .yield_cycle(&session.id, Some("carried hint".into()))
        .await
        .expect("yield");
    h.driver.close_pane(&agent_pane);
    h.coordinator
        .state()
        .store
        .update_status(&h.cwd, &session.id, SessionStatus::Paused, None)
        .await
        .expect("pause");

    let resumed = h
        .coordinator
        .resume(&session.id, &h.cwd, "main", "@2", Some("focus on tests"))
        .await
        .expect("resume");

    assert_eq!(resumed.status, SessionStatus::Active);
    assert_eq!(resumed.tmux_window_id.as_deref(), Some("@2"));
    let agent = resumed.find_agent(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Lost);
    assert_eq!(resumed.orchestrator_cycles.len(), 2);
    assert_eq!(resumed.open_cycle().map(|c| c.cycle), Some(2));

    let user = std::fs::read_to_string(
        paths::prompts_dir(&h.cwd, &session.id).join("orchestrator-user-2.md"),
    )
    .expect("prompt");
    assert!(user.ends_with("The user resumed this session with new instructions: focus on tests"));
    assert!(!user.contains("carried hint"));

    // Counter continues from the persisted agents.
    let next = h
        .coordinator
        .spawn_agent(&session.id, "dev", "next", "go", false)
        .await
        .expect("spawn");
    assert_eq!(next, "agent-002");
}

#[tokio::test]
async fn resume_rejects_completed_session() {
    let h = harness();
    let session = h.start("task").await;
    h.coordinator.complete(&session.id, "done").await.expect("complete");

    let err = h
        .coordinator
        .resume(&session.id, &h.cwd, "main", WINDOW, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot be resumed"));
}

#[tokio::test]
async fn launch_failure_marks_agent_crashed() {
    let h = harness();
    let session = h.start("task").await;
    h.driver.fail_send_keys(true);

    let err = h
        .coordinator
        .spawn_agent(&session.id, "dev", "doomed", "x", false)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("driver:"));

    let doc = h.read(&session.id);
    let agent = doc.find_agent("agent-001").expect("record persisted before launch");
    assert_eq!(agent.status, AgentStatus::Crashed);
    assert!(!h.driver.is_alive(&agent.pane_id));
}

#[tokio::test]
async fn pane_exited_hook_marks_agent_lost() {
    let h = harness_with_delay(5_000);
    let session = h.start("task").await;
    let agent_id = h.spawn(&session.id, "worker").await;
    let pane = h.read(&session.id).agents[0].pane_id.clone();

    assert!(h.coordinator.pane_exited(&pane).await.expect("hook"));
    let doc = h.read(&session.id);
    let agent = doc.find_agent(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Lost);
    assert_eq!(agent.killed_reason.as_deref(), Some("pane exited"));

    assert!(!h.coordinator.pane_exited("%404").await.expect("hook"));
}

#[tokio::test]
async fn tasks_and_listing() {
    let h = harness();
    let first = h.start("first").await;
    let second = h.start("second").await;

    let task = h
        .coordinator
        .add_task(&first.id, "write lexer", None)
        .await
        .expect("add");
    assert_eq!(task.id, "t1");
    h.coordinator
        .update_task(&first.id, "t1", None, Some("write the lexer".into()))
        .await
        .expect("update");
    let tasks = h.coordinator.tasks(&first.id).expect("tasks");
    assert_eq!(tasks[0].description, "write the lexer");

    h.coordinator.complete(&second.id, "done").await.expect("complete");
    let active = h.coordinator.list(&h.cwd, false);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, first.id);
    assert_eq!(h.coordinator.list(&h.cwd, true).len(), 2);

    let err = h.coordinator.status("nope").unwrap_err();
    assert!(err.is_not_found(NotFoundKind::Session));
}

#[tokio::test]
async fn provider_session_is_recorded() {
    let h = harness();
    let session = h.start("task").await;
    let agent_id = h.spawn(&session.id, "worker").await;

    h.coordinator
        .register_provider_session(&session.id, &agent_id, "prov-123")
        .await
        .expect("register");
    let doc = h.read(&session.id);
    assert_eq!(
        doc.find_agent(&agent_id).and_then(|a| a.provider_session_id.as_deref()),
        Some("prov-123")
    );
}
