//! Integration tests for the pane health monitor.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sisyphus::coordinator::health_monitor::{poll_session, PANE_CLOSED};
use sisyphus::coordinator::spawn_health_monitor;
use sisyphus::models::{AgentStatus, SessionStatus};

use super::test_helpers::{harness, harness_with_delay, settle, wait_for, USER_PANE, WINDOW};

#[tokio::test]
async fn vanished_agent_pane_becomes_lost() {
    let h = harness_with_delay(5_000);
    let session = h.start("task").await;
    let first = h.spawn(&session.id, "a").await;
    h.spawn(&session.id, "b").await;
    let pane = h.read(&session.id).agents[0].pane_id.clone();

    h.driver.close_pane(&pane);
    let tracked = h
        .coordinator
        .monitor()
        .snapshot()
        .into_iter()
        .find(|(id, _)| *id == session.id)
        .map(|(_, t)| t)
        .expect("tracked");
    assert_eq!(tracked.window.as_deref(), Some(WINDOW));

    let outcome = poll_session(h.coordinator.state(), &session.id, &tracked)
        .await
        .expect("poll");
    assert_eq!(outcome.lost, 1);
    assert!(!outcome.all_done);
    assert!(!outcome.paused);

    let doc = h.read(&session.id);
    let agent = doc.find_agent(&first).expect("agent");
    assert_eq!(agent.status, AgentStatus::Lost);
    assert_eq!(agent.killed_reason.as_deref(), Some(PANE_CLOSED));
    assert!(h.coordinator.state().registry.lookup_pane(&pane).is_none());

    // A second poll changes nothing.
    let outcome = poll_session(h.coordinator.state(), &session.id, &tracked)
        .await
        .expect("poll");
    assert_eq!(outcome.lost, 0);
}

#[tokio::test]
async fn losing_last_agent_after_yield_respawns_orchestrator() {
    let h = harness();
    let session = h.start("task").await;
    h.spawn(&session.id, "worker").await;
    h.coordinator
        .yield_cycle(&session.id, None)
        .await
        .expect("yield");

    let pane = h.read(&session.id).agents[0].pane_id.clone();
    h.driver.close_pane(&pane);
    h.coordinator.poll_once().await;

    assert!(wait_for(|| h.read(&session.id).orchestrator_cycles.len() == 2).await);
    settle(&h.coordinator, &session.id).await;
    assert_eq!(h.read(&session.id).status, SessionStatus::Active);
}

#[tokio::test]
async fn vanished_orchestrator_with_idle_session_pauses_it() {
    let h = harness();
    let session = h.start("task").await;
    let pane = h.orchestrator_pane(&session.id);

    h.driver.close_pane(&pane);
    h.coordinator.poll_once().await;

    let doc = h.read(&session.id);
    assert_eq!(doc.status, SessionStatus::Paused);
    assert!(h.coordinator.state().registry.orchestrator_pane(&session.id).is_none());
}

#[tokio::test]
async fn vanished_orchestrator_with_running_agents_keeps_session_active() {
    let h = harness();
    let session = h.start("task").await;
    h.spawn(&session.id, "worker").await;
    let pane = h.orchestrator_pane(&session.id);

    h.driver.close_pane(&pane);
    h.coordinator.poll_once().await;

    assert_eq!(h.read(&session.id).status, SessionStatus::Active);
}

#[tokio::test]
async fn empty_pane_listing_is_ignored() {
    let h = harness();
    let session = h.start("task").await;
    h.spawn(&session.id, "worker").await;

    h.driver.close_window(WINDOW);
    h.coordinator.poll_once().await;

    let doc = h.read(&session.id);
    assert_eq!(doc.status, SessionStatus::Active);
    assert_eq!(doc.agents[0].status, AgentStatus::Running);
}

#[tokio::test]
async fn polling_loop_runs_until_cancelled() {
    let h = harness_with_delay(5_000);
    let session = h.start("task").await;
    h.spawn(&session.id, "worker").await;
    let pane = h.read(&session.id).agents[0].pane_id.clone();
    assert!(h.driver.is_alive(USER_PANE));

    let cancel = CancellationToken::new();
    let handle = spawn_health_monitor(h.coordinator.clone(), cancel.clone());

    h.driver.close_pane(&pane);
    assert!(wait_for(|| h.read(&session.id).agents[0].status == AgentStatus::Lost).await);

    cancel.cancel();
    handle.await.expect("monitor task");
}

#[tokio::test]
async fn poll_racing_a_slow_yield_does_not_pause() {
    let h = harness();
    let session = h.start("task").await;
    h.driver.slow_kill(Duration::from_millis(100));

    let coordinator = h.coordinator.clone();
    let session_id = session.id.clone();
    let yielding = tokio::spawn(async move {
        coordinator
            .yield_cycle(&session_id, Some("next".into()))
            .await
    });

    // The orchestrator pane is already gone but the kill has not returned.
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.coordinator.poll_once().await;
    assert_eq!(h.read(&session.id).status, SessionStatus::Active);

    yielding.await.unwrap().expect("yield");
    assert!(wait_for(|| h.read(&session.id).orchestrator_cycles.len() == 2).await);
    settle(&h.coordinator, &session.id).await;

    let doc = h.read(&session.id);
    assert_eq!(doc.status, SessionStatus::Active);
    assert_eq!(doc.open_cycle().map(|c| c.cycle), Some(2));
}
