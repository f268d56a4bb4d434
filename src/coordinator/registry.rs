//! In-memory session and pane indices.
//!
//! Nothing here is authoritative: every entry can be rebuilt from the
//! persisted [`Session`] with [`Registry::rebuild_from`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::NotFoundKind;
use crate::models::{agent::format_agent_id, AgentStatus, Session};
use crate::{AppError, Result};

/// Border colour of orchestrator panes.
pub const ORCHESTRATOR_COLOR: &str = "yellow";

/// Agent colours, assigned round-robin per session.
pub const AGENT_PALETTE: [&str; 6] = ["blue", "green", "magenta", "cyan", "red", "white"];

/// What occupies a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneRole {
    Orchestrator,
    Agent,
}

/// Reverse lookup entry for a pane id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneEntry {
    pub session_id: String,
    pub role: PaneRole,
    /// Set for agent panes.
    pub agent_id: Option<String>,
}

/// Per-session transient data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub cwd: PathBuf,
    pub tmux_session: Option<String>,
    pub window_id: Option<String>,
    pub orchestrator_pane: Option<String>,
    agent_counter: u32,
    color_index: usize,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionEntry>,
    panes: HashMap<String, PaneEntry>,
}

/// Session-keyed lookup tables owned by the coordinator.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or refresh a session entry. Counters of an existing entry are kept.
    pub fn register_session(
        &self,
        session_id: &str,
        cwd: &Path,
        tmux_session: Option<&str>,
        window_id: Option<&str>,
    ) {
        let mut inner = self.lock();
        let entry = inner
            .sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionEntry {
                cwd: cwd.to_path_buf(),
                tmux_session: None,
                window_id: None,
                orchestrator_pane: None,
                agent_counter: 0,
                color_index: 0,
            });
        entry.cwd = cwd.to_path_buf();
        if let Some(tmux) = tmux_session {
            entry.tmux_session = Some(tmux.to_owned());
        }
        if let Some(window) = window_id {
            entry.window_id = Some(window.to_owned());
        }
    }

    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<SessionEntry> {
        self.lock().sessions.get(session_id).cloned()
    }

    /// Working directory of a known session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a session the daemon has never seen.
    pub fn cwd(&self, session_id: &str) -> Result<PathBuf> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|entry| entry.cwd.clone())
            .ok_or_else(|| AppError::not_found(NotFoundKind::Session, session_id))
    }

    /// Window of a known session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session has no window.
    pub fn window(&self, session_id: &str) -> Result<String> {
        self.lock()
            .sessions
            .get(session_id)
            .and_then(|entry| entry.window_id.clone())
            .ok_or_else(|| AppError::not_found(NotFoundKind::Window, session_id))
    }

    /// Distinct working directories of all known sessions.
    #[must_use]
    pub fn known_cwds(&self) -> Vec<PathBuf> {
        let mut cwds: Vec<PathBuf> = self
            .lock()
            .sessions
            .values()
            .map(|entry| entry.cwd.clone())
            .collect();
        cwds.sort();
        cwds.dedup();
        cwds
    }

    #[must_use]
    pub fn orchestrator_pane(&self, session_id: &str) -> Option<String> {
        self.lock()
            .sessions
            .get(session_id)
            .and_then(|entry| entry.orchestrator_pane.clone())
    }

    /// Record (or clear) the orchestrator pane, keeping the pane index in step.
    pub fn set_orchestrator_pane(&self, session_id: &str, pane_id: Option<&str>) {
        let mut inner = self.lock();
        let previous = inner
            .sessions
            .get_mut(session_id)
            .and_then(|entry| {
                std::mem::replace(&mut entry.orchestrator_pane, pane_id.map(str::to_owned))
            });
        if let Some(previous) = previous {
            inner.panes.remove(&previous);
        }
        if let Some(pane_id) = pane_id {
            inner.panes.insert(
                pane_id.to_owned(),
                PaneEntry {
                    session_id: session_id.to_owned(),
                    role: PaneRole::Orchestrator,
                    agent_id: None,
                },
            );
        }
    }

    /// Allocate the next `agent-NNN` id for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unregistered session.
    pub fn next_agent_id(&self, session_id: &str) -> Result<String> {
        let mut inner = self.lock();
        let entry = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::not_found(NotFoundKind::Session, session_id))?;
        entry.agent_counter += 1;
        Ok(format_agent_id(entry.agent_counter))
    }

    /// Next palette colour for a session.
    #[must_use]
    pub fn next_color(&self, session_id: &str) -> &'static str {
        let mut inner = self.lock();
        let Some(entry) = inner.sessions.get_mut(session_id) else {
            return AGENT_PALETTE[0];
        };
        let color = AGENT_PALETTE[entry.color_index % AGENT_PALETTE.len()];
        entry.color_index += 1;
        color
    }

    /// Align counters with the agents already recorded in `session`.
    pub fn reset_counters(&self, session: &Session) {
        if let Some(entry) = self.lock().sessions.get_mut(&session.id) {
            entry.agent_counter = session.max_agent_counter();
            entry.color_index = session.agents.len();
        }
    }

    pub fn register_pane(&self, pane_id: &str, session_id: &str, agent_id: &str) {
        self.lock().panes.insert(
            pane_id.to_owned(),
            PaneEntry {
                session_id: session_id.to_owned(),
                role: PaneRole::Agent,
                agent_id: Some(agent_id.to_owned()),
            },
        );
    }

    pub fn unregister_pane(&self, pane_id: &str) {
        self.lock().panes.remove(pane_id);
    }

    #[must_use]
    pub fn lookup_pane(&self, pane_id: &str) -> Option<PaneEntry> {
        self.lock().panes.get(pane_id).cloned()
    }

    /// Forget every pane of a session and its orchestrator pane.
    pub fn clear_panes(&self, session_id: &str) {
        let mut inner = self.lock();
        inner.panes.retain(|_, entry| entry.session_id != session_id);
        if let Some(entry) = inner.sessions.get_mut(session_id) {
            entry.orchestrator_pane = None;
        }
    }

    /// Rebuild every index for `session` from its persisted document.
    pub fn rebuild_from(&self, session: &Session) {
        self.register_session(
            &session.id,
            &session.cwd,
            session.tmux_session_name.as_deref(),
            session.tmux_window_id.as_deref(),
        );
        self.reset_counters(session);
        self.clear_panes(&session.id);

        let orchestrator_pane = session
            .open_cycle()
            .and_then(|cycle| cycle.pane_id.as_deref());
        self.set_orchestrator_pane(&session.id, orchestrator_pane);

        for agent in &session.agents {
            if agent.status == AgentStatus::Running {
                self.register_pane(&agent.pane_id, &session.id, &agent.id);
            }
        }
    }
}
