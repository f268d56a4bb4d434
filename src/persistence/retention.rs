//! Retention service for time-based session pruning.
//!
//! Runs as a background task deleting the directories of sessions that have
//! been `completed` for longer than `retention_days`. Active and paused
//! sessions are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{KnownProjects, StateStore};
use crate::models::SessionStatus;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly, starting immediately.
#[must_use]
pub fn spawn_retention_task(
    store: StateStore,
    projects: Arc<KnownProjects>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let removed = purge(&store, &projects, retention_days).await;
                    if removed > 0 {
                        info!(removed, retention_days, "retention purge completed");
                    }
                }
            }
        }
    })
}

/// Delete completed sessions older than the retention window.
///
/// Returns the number of sessions removed; individual failures are logged.
pub async fn purge(store: &StateStore, projects: &KnownProjects, retention_days: u32) -> usize {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let mut removed = 0;

    for cwd in projects.list() {
        for session in store.list(&cwd) {
            if session.status != SessionStatus::Completed {
                continue;
            }
            let Some(completed_at) = session.completed_at else {
                warn!(session_id = %session.id, "completed session has no completedAt");
                continue;
            };
            if completed_at >= cutoff {
                continue;
            }
            match store.remove(&cwd, &session.id).await {
                Ok(()) => removed += 1,
                Err(err) => error!(session_id = %session.id, %err, "retention purge failed"),
            }
        }
    }

    removed
}
