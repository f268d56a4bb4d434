//! Integration tests for the retention purge of completed sessions.

use chrono::{Duration, Utc};

use sisyphus::models::SessionStatus;
use sisyphus::paths;
use sisyphus::persistence::{retention, KnownProjects, StateStore};

/// Create a session completed `days_ago` days in the past.
async fn completed_session(store: &StateStore, cwd: &std::path::Path, id: &str, days_ago: i64) {
    store.create(id, "old work", cwd).await.expect("create");
    store
        .mutate(cwd, id, |session| {
            session.status = SessionStatus::Completed;
            session.completed_at = Some(Utc::now() - Duration::days(days_ago));
            Ok(())
        })
        .await
        .expect("complete");
}

#[tokio::test]
async fn purge_removes_only_expired_completed_sessions() {
    let project = tempfile::tempdir().expect("project");
    let home = tempfile::tempdir().expect("home");
    let cwd = project.path();
    let store = StateStore::default();
    let projects = KnownProjects::load(home.path().join("projects.json"));
    projects.record(cwd).expect("record");

    completed_session(&store, cwd, "expired", 45).await;
    completed_session(&store, cwd, "recent", 3).await;
    store.create("active", "ongoing", cwd).await.expect("create");
    store.create("paused", "waiting", cwd).await.expect("create");
    store
        .update_status(cwd, "paused", SessionStatus::Paused, None)
        .await
        .expect("pause");

    let removed = retention::purge(&store, &projects, 30).await;
    assert_eq!(removed, 1);
    assert!(!paths::session_dir(cwd, "expired").exists());
    for kept in ["recent", "active", "paused"] {
        assert!(paths::session_dir(cwd, kept).exists(), "{kept} was removed");
    }

    // A second sweep has nothing left to do.
    assert_eq!(retention::purge(&store, &projects, 30).await, 0);
}

#[tokio::test]
async fn project_index_survives_reload() {
    let home = tempfile::tempdir().expect("home");
    let index = home.path().join("projects.json");
    let projects = KnownProjects::load(index.clone());
    projects.record(std::path::Path::new("/work/a")).expect("record");
    projects.record(std::path::Path::new("/work/b")).expect("record");
    projects.record(std::path::Path::new("/work/a")).expect("record");

    let reloaded = KnownProjects::load(index);
    assert_eq!(
        reloaded.list(),
        vec![
            std::path::PathBuf::from("/work/a"),
            std::path::PathBuf::from("/work/b")
        ]
    );
}
