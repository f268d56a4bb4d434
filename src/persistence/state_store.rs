//! Crash-safe per-session state store.
//!
//! Each session is one JSON document at `<cwd>/.sisyphus/sessions/<id>/state.json`.
//! Every mutation runs a full load → apply → store cycle while holding a
//! per-session `tokio::sync::Mutex`, whose waiters are served in FIFO order,
//! so concurrent read-modify-write sequences on one session never interleave.
//! Sessions do not contend with each other.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use crate::errors::NotFoundKind;
use crate::models::{
    Agent, AgentReport, AgentStatus, OrchestratorCycle, Session, SessionStatus, Task, TaskStatus,
};
use crate::paths;
use crate::{AppError, Result};

use super::atomic_write;

const PLAN_SEED: &str = "---
description: >
  Living document of what still needs to happen. Keep it current every cycle.
---
";

const LOGS_SEED: &str = "---
description: >
  Session memory. Record important observations, decisions, and findings here.
  This persists across cycles: what was tried, what worked or failed, and
  gotchas discovered during implementation.
---
";

const CONTEXT_README: &str = "# context/

Agents save exploration findings, architectural notes, and reference material here for use across cycles.
";

/// Storage backend behind the store's lock: one `load`/`store` pair.
///
/// The JSON-file implementation is the only one shipped; the seam exists so
/// a structured store can replace it without touching callers.
pub trait SessionBackend: Send + Sync {
    /// Read the document for `session_id` under `cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no document exists, or
    /// `AppError::State` if it cannot be parsed.
    fn load(&self, cwd: &Path, session_id: &str) -> Result<Session>;

    /// Persist `session` atomically, replacing any previous document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if the document cannot be written.
    fn store(&self, session: &Session) -> Result<()>;
}

/// JSON documents written with temp-file-then-rename.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFileBackend;

impl SessionBackend for JsonFileBackend {
    fn load(&self, cwd: &Path, session_id: &str) -> Result<Session> {
        let path = paths::state_path(cwd, session_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AppError::not_found(NotFoundKind::Session, session_id));
            }
            Err(err) => {
                return Err(AppError::State(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&raw).map_err(|err| {
            AppError::State(format!("corrupt state document {}: {err}", path.display()))
        })
    }

    fn store(&self, session: &Session) -> Result<()> {
        let path = paths::state_path(&session.cwd, &session.id);
        let body = serde_json::to_vec_pretty(session)?;
        atomic_write(&path, &body)
    }
}

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Serialized access to session documents.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn SessionBackend>,
    locks: Arc<Mutex<LockMap>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(Arc::new(JsonFileBackend))
    }
}

impl StateStore {
    /// Create a store over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(session_id.to_owned()).or_default())
    }

    /// Create the session directory tree and its initial document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session already exists, or
    /// `AppError::Io`/`AppError::State` if the files cannot be written.
    pub async fn create(&self, session_id: &str, task: &str, cwd: &Path) -> Result<Session> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        if paths::state_path(cwd, session_id).exists() {
            return Err(AppError::InvalidState(format!(
                "session {session_id} already exists"
            )));
        }

        seed_session_dir(cwd, session_id)?;
        let session = Session::new(session_id.to_owned(), task.to_owned(), cwd.to_path_buf());
        self.backend.store(&session)?;
        debug!(session_id, cwd = %cwd.display(), "session created");
        Ok(session)
    }

    /// Read a session document. Not retried; a missing document is fatal to the caller.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub fn read(&self, cwd: &Path, session_id: &str) -> Result<Session> {
        self.backend.load(cwd, session_id)
    }

    /// Apply `apply` to the session and persist the result, under the session lock.
    ///
    /// Nothing is written when `apply` fails. Completed sessions reject all
    /// mutations.
    ///
    /// # Errors
    ///
    /// Returns the error from loading, from `apply`, or from storing;
    /// `AppError::InvalidState` if the session is completed.
    pub async fn mutate<T, F>(&self, cwd: &Path, session_id: &str, apply: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.backend.load(cwd, session_id)?;
        if session.status == SessionStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "session {session_id} is completed"
            )));
        }
        let output = apply(&mut session)?;
        self.backend.store(&session)?;
        Ok(output)
    }

    /// All readable sessions under `cwd`. Unreadable documents are skipped.
    #[must_use]
    pub fn list(&self, cwd: &Path) -> Vec<Session> {
        let Ok(entries) = fs::read_dir(paths::sessions_dir(cwd)) else {
            return Vec::new();
        };
        let mut sessions: Vec<Session> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let id = entry.file_name().to_string_lossy().into_owned();
                match self.backend.load(cwd, &id) {
                    Ok(session) => Some(session),
                    Err(err) => {
                        warn!(session_id = %id, %err, "skipping unreadable session");
                        None
                    }
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Physically delete a session directory (retention pruning only).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be removed.
    pub async fn remove(&self, cwd: &Path, session_id: &str) -> Result<()> {
        let lock = self.lock_for(session_id);
        {
            let _guard = lock.lock().await;
            fs::remove_dir_all(paths::session_dir(cwd, session_id)).map_err(|err| {
                AppError::Io(format!("failed to remove session {session_id}: {err}"))
            })?;
        }
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        Ok(())
    }

    // ── Typed helpers ─────────────────────────────────────

    /// Append an agent record.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::mutate`] failures.
    pub async fn add_agent(&self, cwd: &Path, session_id: &str, agent: Agent) -> Result<()> {
        self.mutate(cwd, session_id, move |session| {
            session.agents.push(agent);
            Ok(())
        })
        .await
    }

    /// Modify the newest agent with `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such agent exists.
    pub async fn update_agent<F>(
        &self,
        cwd: &Path,
        session_id: &str,
        agent_id: &str,
        update: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Agent),
    {
        self.mutate(cwd, session_id, |session| {
            let agent = session
                .find_agent_mut(agent_id)
                .ok_or_else(|| AppError::not_found(NotFoundKind::Agent, agent_id))?;
            update(agent);
            Ok(())
        })
        .await
    }

    /// Move a running agent to a terminal status.
    ///
    /// Returns whether the agent changed and the session as persisted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such agent exists.
    pub async fn finish_agent(
        &self,
        cwd: &Path,
        session_id: &str,
        agent_id: &str,
        status: AgentStatus,
        reason: Option<String>,
    ) -> Result<(bool, Session)> {
        self.mutate(cwd, session_id, |session| {
            let agent = session
                .find_agent_mut(agent_id)
                .ok_or_else(|| AppError::not_found(NotFoundKind::Agent, agent_id))?;
            let changed = agent.finish(status, reason);
            Ok((changed, session.clone()))
        })
        .await
    }

    /// Append a report to the newest agent with `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such agent exists.
    pub async fn append_agent_report(
        &self,
        cwd: &Path,
        session_id: &str,
        agent_id: &str,
        report: AgentReport,
    ) -> Result<()> {
        self.update_agent(cwd, session_id, agent_id, move |agent| {
            agent.reports.push(report);
        })
        .await
    }

    /// Append an orchestrator cycle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the cycle number does not
    /// increase or another cycle is still open.
    pub async fn add_cycle(
        &self,
        cwd: &Path,
        session_id: &str,
        cycle: OrchestratorCycle,
    ) -> Result<()> {
        self.mutate(cwd, session_id, move |session| {
            if let Some(last) = session.orchestrator_cycles.last() {
                if cycle.cycle <= last.cycle {
                    return Err(AppError::InvalidState(format!(
                        "cycle {} does not follow cycle {}",
                        cycle.cycle, last.cycle
                    )));
                }
                if last.completed_at.is_none() {
                    return Err(AppError::InvalidState(format!(
                        "cycle {} is still open",
                        last.cycle
                    )));
                }
            }
            session.orchestrator_cycles.push(cycle);
            Ok(())
        })
        .await
    }

    /// Close the last cycle, optionally storing a prompt for the next one.
    /// No-op when there are no cycles.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::mutate`] failures.
    pub async fn complete_cycle(
        &self,
        cwd: &Path,
        session_id: &str,
        next_prompt: Option<String>,
    ) -> Result<()> {
        self.mutate(cwd, session_id, move |session| {
            if let Some(cycle) = session.orchestrator_cycles.last_mut() {
                if cycle.completed_at.is_none() {
                    cycle.completed_at = Some(Utc::now());
                }
                if let Some(prompt) = next_prompt.filter(|p| !p.trim().is_empty()) {
                    cycle.next_prompt = Some(prompt);
                }
            }
            Ok(())
        })
        .await
    }

    /// Record `agent_id` as spawned during the current cycle. No-op without cycles.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::mutate`] failures.
    pub async fn append_agent_to_last_cycle(
        &self,
        cwd: &Path,
        session_id: &str,
        agent_id: &str,
    ) -> Result<()> {
        self.mutate(cwd, session_id, |session| {
            if let Some(cycle) = session.orchestrator_cycles.last_mut() {
                cycle.agents_spawned.push(agent_id.to_owned());
            }
            Ok(())
        })
        .await
    }

    /// Change the session status, respecting the lifecycle state machine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` for a forbidden transition.
    pub async fn update_status(
        &self,
        cwd: &Path,
        session_id: &str,
        status: SessionStatus,
        completion_report: Option<String>,
    ) -> Result<()> {
        self.mutate(cwd, session_id, move |session| {
            if !session.can_transition_to(status) {
                return Err(AppError::InvalidState(format!(
                    "cannot move session {} from {} to {}",
                    session.id,
                    session.status.as_str(),
                    status.as_str()
                )));
            }
            session.status = status;
            if status == SessionStatus::Completed {
                session.completed_at = Some(Utc::now());
            }
            if completion_report.is_some() {
                session.completion_report = completion_report;
            }
            Ok(())
        })
        .await
    }

    /// Mark the session completed with its final report.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::update_status`] failures.
    pub async fn complete_session(&self, cwd: &Path, session_id: &str, report: &str) -> Result<()> {
        self.update_status(
            cwd,
            session_id,
            SessionStatus::Completed,
            Some(report.to_owned()),
        )
        .await
    }

    /// Bind the session to a multiplexer session and window.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::mutate`] failures.
    pub async fn update_tmux(
        &self,
        cwd: &Path,
        session_id: &str,
        tmux_session: &str,
        window_id: &str,
    ) -> Result<()> {
        self.mutate(cwd, session_id, |session| {
            session.tmux_session_name = Some(tmux_session.to_owned());
            session.tmux_window_id = Some(window_id.to_owned());
            Ok(())
        })
        .await
    }

    /// Append a task with the next `t<N>` id.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::mutate`] failures.
    pub async fn add_task(
        &self,
        cwd: &Path,
        session_id: &str,
        description: &str,
        status: Option<TaskStatus>,
    ) -> Result<Task> {
        self.mutate(cwd, session_id, |session| {
            let task = Task {
                id: format!("t{}", session.tasks.len() + 1),
                description: description.to_owned(),
                status: status.unwrap_or_default(),
            };
            session.tasks.push(task.clone());
            Ok(task)
        })
        .await
    }

    /// Update a task's status and/or description.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no task has `task_id`.
    pub async fn update_task(
        &self,
        cwd: &Path,
        session_id: &str,
        task_id: &str,
        status: Option<TaskStatus>,
        description: Option<String>,
    ) -> Result<Task> {
        self.mutate(cwd, session_id, move |session| {
            let task = session
                .tasks
                .iter_mut()
                .rev()
                .find(|task| task.id == task_id)
                .ok_or_else(|| AppError::not_found(NotFoundKind::Task, task_id))?;
            if let Some(status) = status {
                task.status = status;
            }
            if let Some(description) = description {
                task.description = description;
            }
            Ok(task.clone())
        })
        .await
    }
}

fn seed_session_dir(cwd: &Path, session_id: &str) -> Result<()> {
    let io = |err: std::io::Error| AppError::Io(format!("failed to seed session dir: {err}"));

    fs::create_dir_all(paths::context_dir(cwd, session_id)).map_err(io)?;
    fs::create_dir_all(paths::prompts_dir(cwd, session_id)).map_err(io)?;
    fs::create_dir_all(paths::reports_dir(cwd, session_id)).map_err(io)?;
    fs::write(paths::plan_path(cwd, session_id), PLAN_SEED).map_err(io)?;
    fs::write(paths::logs_path(cwd, session_id), LOGS_SEED).map_err(io)?;
    fs::write(
        paths::context_dir(cwd, session_id).join("README.md"),
        CONTEXT_README,
    )
    .map_err(io)?;
    Ok(())
}
