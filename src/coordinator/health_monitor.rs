//! Pane health monitor: detects processes that vanished without a
//! lifecycle event.
//!
//! Every tick lists the live panes of each tracked session's window. A
//! running agent whose pane is gone becomes `lost`; if that leaves no agent
//! running, a respawn is requested. An orchestrator pane that disappeared
//! without a yield pauses the session when nothing else is running.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::agent;
use super::{AppState, SessionCoordinator};
use crate::errors::NotFoundKind;
use crate::models::{AgentStatus, SessionStatus};
use crate::{AppError, Result};

/// Reason recorded on agents whose pane disappeared.
pub const PANE_CLOSED: &str = "pane closed";

/// A session under observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSession {
    pub cwd: PathBuf,
    /// Unknown until the orchestrator has been placed.
    pub window: Option<String>,
}

/// Result of polling one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Agents demoted to `lost` this tick.
    pub lost: usize,
    /// The last running agent was lost; a respawn should follow.
    pub all_done: bool,
    /// The session was paused because its orchestrator vanished.
    pub paused: bool,
}

/// Set of sessions the polling loop visits.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    tracked: Mutex<HashMap<String, TrackedSession>>,
}

impl HealthMonitor {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, TrackedSession>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching a session, keeping any window already known.
    pub fn track(&self, session_id: &str, cwd: &Path) {
        let mut tracked = self.lock();
        let window = tracked.get(session_id).and_then(|t| t.window.clone());
        tracked.insert(
            session_id.to_owned(),
            TrackedSession {
                cwd: cwd.to_path_buf(),
                window,
            },
        );
    }

    /// Attach the window to poll for a tracked session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not tracked.
    pub fn update_window(&self, session_id: &str, window: &str) -> Result<()> {
        let mut tracked = self.lock();
        let entry = tracked
            .get_mut(session_id)
            .ok_or_else(|| AppError::not_found(NotFoundKind::Session, session_id))?;
        entry.window = Some(window.to_owned());
        Ok(())
    }

    pub fn untrack(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    #[must_use]
    pub fn is_tracked(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Copy of the tracked set, so polling never holds the lock across I/O.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, TrackedSession)> {
        self.lock()
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect()
    }
}

/// Check one session's panes against its persisted agents.
///
/// # Errors
///
/// Propagates state-store and driver failures; the caller logs them.
pub async fn poll_session(
    state: &AppState,
    session_id: &str,
    tracked: &TrackedSession,
) -> Result<PollOutcome> {
    let mut outcome = PollOutcome::default();
    let Some(window) = tracked.window.as_deref() else {
        return Ok(outcome);
    };

    let session = state.store.read(&tracked.cwd, session_id)?;
    if session.status != SessionStatus::Active {
        return Ok(outcome);
    }

    let panes = state.driver.list_panes(window).await?;
    if panes.is_empty() {
        debug!(session_id, window, "no live panes reported; skipping");
        return Ok(outcome);
    }
    let live = |pane_id: &str| panes.iter().any(|p| p.pane_id == pane_id);

    for running in session.running_agents() {
        if live(&running.pane_id) {
            continue;
        }
        let (changed, all_done) = agent::mark(
            state,
            &tracked.cwd,
            session_id,
            &running.id,
            AgentStatus::Lost,
            Some(PANE_CLOSED.to_owned()),
        )
        .await?;
        state.registry.unregister_pane(&running.pane_id);
        if changed {
            warn!(
                session_id,
                agent_id = %running.id,
                pane_id = %running.pane_id,
                "agent pane vanished"
            );
            outcome.lost += 1;
            outcome.all_done |= all_done;
        }
    }

    if let Some(pane_id) = state.registry.orchestrator_pane(session_id) {
        if !live(&pane_id) {
            let running = state.store.read(&tracked.cwd, session_id)?.running_count();
            if running == 0 {
                state
                    .store
                    .update_status(&tracked.cwd, session_id, SessionStatus::Paused, None)
                    .await?;
                state.registry.set_orchestrator_pane(session_id, None);
                info!(session_id, %pane_id, "orchestrator pane vanished; session paused");
                outcome.paused = true;
            }
        }
    }

    Ok(outcome)
}

/// Spawn the polling loop.
///
/// Errors in one session are logged and never stop the loop or affect
/// other sessions.
#[must_use]
pub fn spawn_health_monitor(
    coordinator: SessionCoordinator,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = coordinator.state().config.poll_interval();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("health monitor shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {}
            }

            coordinator.poll_once().await;
        }
    })
}
