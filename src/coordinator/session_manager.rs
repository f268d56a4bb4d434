//! Session coordinator: start, resume, kill, respawn and restart recovery.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::agent::{self, SpawnAgent};
use super::health_monitor::{self, HealthMonitor};
use super::{orchestrator, AppState, PaneRole};
use crate::errors::NotFoundKind;
use crate::models::{AgentStatus, Session, SessionStatus, Task, TaskStatus};
use crate::worktree;
use crate::{AppError, Result};

/// Reason recorded on agents killed with their session.
pub const KILLED_BY_USER: &str = "session killed by user";
/// Reason recorded when the multiplexer reports an agent pane exited.
pub const PANE_EXITED: &str = "pane exited";

/// Row of the `list` response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub task: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub agent_count: usize,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            task: session.task.clone(),
            status: session.status,
            created_at: session.created_at,
            agent_count: session.agents.len(),
        }
    }
}

/// How a scheduled respawn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RespawnOutcome {
    /// A new orchestrator cycle is running; the in-flight slot is still held.
    Spawned,
    /// No longer wanted; the slot was already released.
    Skipped,
}

/// Top-level state machine over sessions.
///
/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct SessionCoordinator {
    state: Arc<AppState>,
    monitor: Arc<HealthMonitor>,
    respawning: Arc<Mutex<HashSet<String>>>,
    merge_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            monitor: Arc::new(HealthMonitor::default()),
            respawning: Arc::new(Mutex::new(HashSet::new())),
            merge_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    #[must_use]
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Working directory of a session known to this daemon.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub fn cwd_of(&self, session_id: &str) -> Result<PathBuf> {
        self.state.registry.cwd(session_id)
    }

    // ── Lifecycle ─────────────────────────────────────────

    /// Create a session and spawn its first orchestrator.
    ///
    /// # Errors
    ///
    /// Returns store or driver errors. If the orchestrator cannot be spawned
    /// the session is left paused so it can be resumed.
    pub async fn start(
        &self,
        task: &str,
        cwd: &Path,
        tmux_session: &str,
        window: &str,
    ) -> Result<Session> {
        let session_id = Uuid::new_v4().to_string();
        let span = info_span!("start_session", session_id = %session_id);
        async move {
            self.state.store.create(&session_id, task, cwd).await?;
            if let Err(err) = self.state.projects.record(cwd) {
                warn!(%err, "failed to record project directory");
            }
            self.state
                .registry
                .register_session(&session_id, cwd, Some(tmux_session), Some(window));
            self.state
                .store
                .update_tmux(cwd, &session_id, tmux_session, window)
                .await?;
            self.monitor.track(&session_id, cwd);

            if let Err(err) =
                orchestrator::spawn(&self.state, &session_id, cwd, window, None).await
            {
                error!(%err, "initial orchestrator spawn failed; pausing session");
                self.monitor.untrack(&session_id);
                self.state
                    .store
                    .update_status(cwd, &session_id, SessionStatus::Paused, None)
                    .await?;
                return Err(err);
            }
            self.monitor.update_window(&session_id, window)?;

            info!(cwd = %cwd.display(), "session started");
            self.state.store.read(cwd, &session_id)
        }
        .instrument(span)
        .await
    }

    /// Reactivate a paused (or orphaned active) session.
    ///
    /// Running agents whose panes are gone become `lost`, counters are
    /// realigned with the existing agents, and a new orchestrator is spawned.
    /// `message` takes priority over any carried prompt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` for a completed session.
    pub async fn resume(
        &self,
        session_id: &str,
        cwd: &Path,
        tmux_session: &str,
        window: &str,
        message: Option<&str>,
    ) -> Result<Session> {
        let span = info_span!("resume_session", session_id);
        async move {
            let session = self.state.store.read(cwd, session_id)?;
            if session.status == SessionStatus::Completed {
                return Err(AppError::InvalidState(format!(
                    "session {session_id} is completed and cannot be resumed"
                )));
            }

            let live: Vec<String> = match self.state.driver.list_panes(window).await {
                Ok(panes) => panes.into_iter().map(|p| p.pane_id).collect(),
                Err(err) => {
                    warn!(%err, "could not list panes; treating all as gone");
                    Vec::new()
                }
            };
            for running in session.running_agents() {
                if !live.contains(&running.pane_id) {
                    agent::mark(
                        &self.state,
                        cwd,
                        session_id,
                        &running.id,
                        AgentStatus::Lost,
                        Some("pane gone when session resumed".to_owned()),
                    )
                    .await?;
                }
            }

            if let Err(err) = self.state.projects.record(cwd) {
                warn!(%err, "failed to record project directory");
            }
            self.state
                .store
                .update_status(cwd, session_id, SessionStatus::Active, None)
                .await?;
            self.state
                .store
                .update_tmux(cwd, session_id, tmux_session, window)
                .await?;

            let session = self.state.store.read(cwd, session_id)?;
            self.state.registry.rebuild_from(&session);
            self.monitor.track(session_id, cwd);

            orchestrator::spawn(&self.state, session_id, cwd, window, message).await?;
            self.monitor.update_window(session_id, window)?;

            info!("session resumed");
            self.state.store.read(cwd, session_id)
        }
        .instrument(span)
        .await
    }

    /// Kill every running agent, tear down the window and complete the session.
    ///
    /// Returns the number of agents killed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or
    /// `AppError::InvalidState` if it is already completed.
    pub async fn kill(&self, session_id: &str) -> Result<usize> {
        let cwd = self.cwd_of(session_id)?;
        let span = info_span!("kill_session", session_id);
        async move {
            let session = self.state.store.read(&cwd, session_id)?;
            if session.status == SessionStatus::Completed {
                return Err(AppError::InvalidState(format!(
                    "session {session_id} is already completed"
                )));
            }
            self.monitor.untrack(session_id);

            let mut killed = 0;
            for running in session.running_agents() {
                agent::kill(&self.state, &cwd, session_id, &running.id, KILLED_BY_USER).await?;
                killed += 1;
            }

            // Conflicted worktrees stay for manual resolution.
            for isolated in session.agents.iter().filter(|a| a.merge_pending()) {
                if let Some(path) = isolated.worktree_path.as_deref() {
                    worktree::cleanup(&cwd, path, isolated.branch_name.as_deref()).await;
                }
            }

            let pane = self
                .state
                .registry
                .orchestrator_pane(session_id)
                .or_else(|| session.open_cycle().and_then(|c| c.pane_id.clone()));
            if let Some(pane_id) = pane {
                agent::best_effort_kill(&self.state, &pane_id).await;
            }

            self.state.store.complete_cycle(&cwd, session_id, None).await?;
            self.state
                .store
                .update_status(&cwd, session_id, SessionStatus::Completed, None)
                .await?;

            if let Ok(window) = self.state.registry.window(session_id) {
                if let Err(err) = self.state.driver.kill_window(&window).await {
                    warn!(%window, %err, "failed to kill window");
                }
            }
            self.state.registry.clear_panes(session_id);

            info!(killed, "session killed");
            Ok(killed)
        }
        .instrument(span)
        .await
    }

    // ── Agent and orchestrator requests ───────────────────

    /// Spawn an agent into the session's window.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or one without a
    /// window, or any spawn failure.
    pub async fn spawn_agent(
        &self,
        session_id: &str,
        agent_type: &str,
        name: &str,
        instruction: &str,
        isolate: bool,
    ) -> Result<String> {
        let cwd = self.cwd_of(session_id)?;
        let window = self.state.registry.window(session_id)?;
        let agent = agent::spawn(
            &self.state,
            SpawnAgent {
                session_id,
                cwd: &cwd,
                window: &window,
                agent_type,
                name,
                instruction,
                worktree: isolate,
            },
        )
        .await?;
        Ok(agent.id)
    }

    /// Append a progress report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or agent.
    pub async fn report(&self, session_id: &str, agent_id: &str, content: &str) -> Result<()> {
        let cwd = self.cwd_of(session_id)?;
        agent::report(&self.state, &cwd, session_id, agent_id, content).await?;
        Ok(())
    }

    /// Submit an agent's final report; respawns the orchestrator when it was the last one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or agent.
    pub async fn submit(&self, session_id: &str, agent_id: &str, report: &str) -> Result<bool> {
        let cwd = self.cwd_of(session_id)?;
        let all_done = agent::submit(&self.state, &cwd, session_id, agent_id, report).await?;
        if all_done {
            self.trigger_respawn(session_id);
        }
        Ok(all_done)
    }

    /// End the current orchestrator cycle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn yield_cycle(&self, session_id: &str, next_prompt: Option<String>) -> Result<()> {
        let cwd = self.cwd_of(session_id)?;
        let running = orchestrator::yield_cycle(&self.state, session_id, &cwd, next_prompt).await?;
        if running == 0 {
            self.trigger_respawn(session_id);
        }
        Ok(())
    }

    /// Complete the session with a final report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn complete(&self, session_id: &str, report: &str) -> Result<()> {
        let cwd = self.cwd_of(session_id)?;
        self.monitor.untrack(session_id);
        orchestrator::complete(&self.state, session_id, &cwd, report).await?;
        self.state.registry.clear_panes(session_id);
        Ok(())
    }

    /// Handle a pane-exit notification from the multiplexer.
    ///
    /// Converges with the health monitor: an agent pane becomes `lost`, an
    /// orchestrator pane pauses an idle session. Returns whether the pane was known.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn pane_exited(&self, pane_id: &str) -> Result<bool> {
        let Some(entry) = self.state.registry.lookup_pane(pane_id) else {
            return Ok(false);
        };
        self.state.registry.unregister_pane(pane_id);
        let cwd = self.cwd_of(&entry.session_id)?;

        match (entry.role, entry.agent_id) {
            (PaneRole::Agent, Some(agent_id)) => {
                let (changed, all_done) = agent::mark(
                    &self.state,
                    &cwd,
                    &entry.session_id,
                    &agent_id,
                    AgentStatus::Lost,
                    Some(PANE_EXITED.to_owned()),
                )
                .await?;
                if changed && all_done {
                    self.trigger_respawn(&entry.session_id);
                }
            }
            _ => {
                let session = self.state.store.read(&cwd, &entry.session_id)?;
                if session.status == SessionStatus::Active && session.running_count() == 0 {
                    self.state
                        .store
                        .update_status(&cwd, &entry.session_id, SessionStatus::Paused, None)
                        .await?;
                    info!(
                        session_id = %entry.session_id,
                        pane_id,
                        "orchestrator exited; session paused"
                    );
                }
                self.state
                    .registry
                    .set_orchestrator_pane(&entry.session_id, None);
            }
        }
        Ok(true)
    }

    // ── Queries and tasks ─────────────────────────────────

    /// Read a session document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub fn status(&self, session_id: &str) -> Result<Session> {
        let cwd = self.cwd_of(session_id)?;
        self.state.store.read(&cwd, session_id)
    }

    /// Sessions stored under `cwd`; completed ones only when `all` is set.
    #[must_use]
    pub fn list(&self, cwd: &Path, all: bool) -> Vec<SessionSummary> {
        self.state
            .store
            .list(cwd)
            .iter()
            .filter(|s| all || s.status != SessionStatus::Completed)
            .map(SessionSummary::from)
            .collect()
    }

    /// Add a task to the session's list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn add_task(
        &self,
        session_id: &str,
        description: &str,
        status: Option<TaskStatus>,
    ) -> Result<Task> {
        let cwd = self.cwd_of(session_id)?;
        self.state
            .store
            .add_task(&cwd, session_id, description, status)
            .await
    }

    /// Update a task's status and/or description.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or task.
    pub async fn update_task(
        &self,
        session_id: &str,
        task_id: &str,
        status: Option<TaskStatus>,
        description: Option<String>,
    ) -> Result<Task> {
        let cwd = self.cwd_of(session_id)?;
        self.state
            .store
            .update_task(&cwd, session_id, task_id, status, description)
            .await
    }

    /// The session's task list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub fn tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        Ok(self.status(session_id)?.tasks)
    }

    /// Record the provider's own session id for an agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or agent.
    pub async fn register_provider_session(
        &self,
        session_id: &str,
        agent_id: &str,
        provider_session_id: &str,
    ) -> Result<()> {
        let cwd = self.cwd_of(session_id)?;
        agent::register_provider_session(
            &self.state,
            &cwd,
            session_id,
            agent_id,
            provider_session_id,
        )
        .await
    }

    // ── Respawn coordination ──────────────────────────────

    /// Whether a respawn for `session_id` is scheduled or running.
    #[must_use]
    pub fn respawn_pending(&self, session_id: &str) -> bool {
        self.respawning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }

    /// Request an orchestrator respawn for a session whose agents are all done.
    ///
    /// Returns `false` when a respawn is already in flight; the duplicate is
    /// dropped. The respawn itself runs on a separate task after the
    /// configured delay.
    pub fn trigger_respawn(&self, session_id: &str) -> bool {
        let inserted = self
            .respawning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_owned());
        if !inserted {
            info!(session_id, "respawn already in flight; trigger dropped");
            return false;
        }

        let this = self.clone();
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            let span = info_span!("respawn", session_id = %session_id);
            match this.run_respawn(&session_id).instrument(span).await {
                Ok(RespawnOutcome::Skipped) => {}
                Ok(RespawnOutcome::Spawned) => this.release_respawn(&session_id),
                Err(err) => {
                    error!(session_id = %session_id, %err, "orchestrator respawn failed");
                    this.release_respawn(&session_id);
                }
            }
        });
        true
    }

    fn release_respawn(&self, session_id: &str) {
        self.respawning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Decide under the in-flight lock whether the respawn is still wanted.
    ///
    /// When it is not, the slot is released in the same critical section, so a
    /// trigger that raced this check either saw the slot held (and its cause is
    /// visible in the session just read) or finds it free and schedules anew.
    fn claim_or_release(&self, cwd: &Path, session_id: &str) -> Result<bool> {
        let mut respawning = self.respawning.lock().unwrap_or_else(PoisonError::into_inner);
        let session = self.state.store.read(cwd, session_id)?;
        let blocker = if session.status != SessionStatus::Active {
            Some("session no longer active")
        } else if session.running_count() > 0 || session.open_cycle().is_some() {
            Some("work resumed")
        } else {
            None
        };
        match blocker {
            Some(reason) => {
                respawning.remove(session_id);
                info!(reason, "respawn skipped");
                Ok(false)
            }
            None => Ok(true),
        }
    }

    async fn run_respawn(&self, session_id: &str) -> Result<RespawnOutcome> {
        let cwd = self.cwd_of(session_id)?;
        if !self.claim_or_release(&cwd, session_id)? {
            return Ok(RespawnOutcome::Skipped);
        }

        self.merge_worktrees(&cwd, session_id).await?;
        tokio::time::sleep(self.state.config.respawn_delay()).await;

        if !self.claim_or_release(&cwd, session_id)? {
            return Ok(RespawnOutcome::Skipped);
        }

        let window = self.state.registry.window(session_id)?;
        orchestrator::spawn(&self.state, session_id, &cwd, &window, None).await?;
        if self.monitor.is_tracked(session_id) {
            self.monitor.update_window(session_id, &window)?;
        }
        Ok(RespawnOutcome::Spawned)
    }

    /// Merge worktrees of finished agents and record each outcome.
    ///
    /// # Errors
    ///
    /// Propagates store failures while recording outcomes.
    pub async fn merge_worktrees(&self, cwd: &Path, session_id: &str) -> Result<()> {
        let _guard = self.merge_lock.lock().await;
        let session = self.state.store.read(cwd, session_id)?;
        let finished: Vec<_> = session
            .agents
            .into_iter()
            .filter(|a| a.status.is_terminal() && a.merge_pending())
            .collect();
        if finished.is_empty() {
            return Ok(());
        }

        let results = worktree::merge(cwd, &finished).await;
        self.state
            .store
            .mutate(cwd, session_id, |session| {
                for result in &results {
                    if let Some(agent) = session.find_agent_mut(&result.agent_id) {
                        agent.merge_status = Some(result.status);
                        agent.merge_details.clone_from(&result.details);
                    }
                }
                Ok(())
            })
            .await
    }

    // ── Polling and recovery ──────────────────────────────

    /// Run one health check over every tracked session.
    pub async fn poll_once(&self) {
        for (session_id, tracked) in self.monitor.snapshot() {
            match health_monitor::poll_session(&self.state, &session_id, &tracked).await {
                Ok(outcome) => {
                    if outcome.all_done {
                        self.trigger_respawn(&session_id);
                    }
                }
                Err(err) if err.is_not_found(NotFoundKind::Session) => {
                    warn!(session_id = %session_id, "tracked session vanished; untracking");
                    self.monitor.untrack(&session_id);
                }
                Err(err) => warn!(session_id = %session_id, %err, "health check failed"),
            }
        }
    }

    /// Rebuild in-memory state from disk after a daemon restart.
    ///
    /// Every session of every known project is registered. Active sessions
    /// whose window still has live panes are tracked again; the rest are
    /// paused. Returns the number of sessions re-attached.
    pub async fn recover_on_startup(&self) -> usize {
        let mut attached = 0;
        for cwd in self.state.projects.list() {
            for session in self.state.store.list(&cwd) {
                self.state.registry.rebuild_from(&session);
                if session.status != SessionStatus::Active {
                    continue;
                }
                match self.reattach(&cwd, &session).await {
                    Ok(true) => attached += 1,
                    Ok(false) => {}
                    Err(err) => warn!(session_id = %session.id, %err, "session recovery failed"),
                }
            }
        }
        info!(attached, "startup recovery finished");
        attached
    }

    async fn reattach(&self, cwd: &Path, session: &Session) -> Result<bool> {
        let live = match session.tmux_window_id.as_deref() {
            Some(window) => match self.state.driver.list_panes(window).await {
                Ok(panes) => !panes.is_empty(),
                Err(err) => {
                    warn!(session_id = %session.id, %err, "could not list panes");
                    false
                }
            },
            None => false,
        };

        if let (true, Some(window)) = (live, session.tmux_window_id.as_deref()) {
            self.monitor.track(&session.id, cwd);
            self.monitor.update_window(&session.id, window)?;
            info!(session_id = %session.id, window, "session re-attached");
            // The daemon stopped between a hand-back and the respawn it scheduled.
            if session.open_cycle().is_none() && session.running_count() == 0 {
                info!(session_id = %session.id, "no orchestrator or agents running; respawning");
                self.trigger_respawn(&session.id);
            }
            return Ok(true);
        }

        self.state
            .store
            .update_status(cwd, &session.id, SessionStatus::Paused, None)
            .await?;
        self.state.registry.clear_panes(&session.id);
        info!(session_id = %session.id, "window gone; session paused");
        Ok(false)
    }
}
