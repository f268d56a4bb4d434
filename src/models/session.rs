//! Session model and lifecycle helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::{Agent, AgentStatus};
use super::cycle::OrchestratorCycle;
use super::task::Task;

/// Lifecycle status for a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Orchestrator or agents are (or should be) working.
    Active,
    /// Nothing is running; waiting for an explicit resume.
    Paused,
    /// Finished or killed; read-only from here on.
    Completed,
}

impl SessionStatus {
    /// Lowercase label as persisted.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

/// Root aggregate persisted as one JSON document per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier (UUID v4).
    pub id: String,
    /// Free-text task description.
    pub task: String,
    /// Working directory the session belongs to.
    pub cwd: PathBuf,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set once the session reaches `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Final report supplied on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_report: Option<String>,
    /// Work items tracked by the orchestrator.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Spawned agents, in spawn order.
    #[serde(default)]
    pub agents: Vec<Agent>,
    /// Orchestrator activations, in order.
    #[serde(default)]
    pub orchestrator_cycles: Vec<OrchestratorCycle>,
    /// Multiplexer session the work runs in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session_name: Option<String>,
    /// Multiplexer window hosting the panes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_window_id: Option<String>,
}

impl Session {
    /// Construct a fresh active session.
    #[must_use]
    pub fn new(id: String, task: String, cwd: PathBuf) -> Self {
        Self {
            id,
            task,
            cwd,
            status: SessionStatus::Active,
            created_at: Utc::now(),
            completed_at: None,
            completion_report: None,
            tasks: Vec::new(),
            agents: Vec::new(),
            orchestrator_cycles: Vec::new(),
            tmux_session_name: None,
            tmux_window_id: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Paused -> Completed` is allowed so a paused session can be killed.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Active,
                SessionStatus::Active | SessionStatus::Paused | SessionStatus::Completed
            ) | (
                SessionStatus::Paused,
                SessionStatus::Active | SessionStatus::Completed
            )
        )
    }

    /// Agents still marked `running`.
    pub fn running_agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents
            .iter()
            .filter(|agent| agent.status == AgentStatus::Running)
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running_agents().count()
    }

    /// True exactly when at least one agent exists and none is running.
    ///
    /// Session-wide: agents spawned by other agents count the same as those
    /// spawned by the orchestrator.
    #[must_use]
    pub fn all_agents_done(&self) -> bool {
        !self.agents.is_empty() && self.running_count() == 0
    }

    /// Newest agent with the given id.
    #[must_use]
    pub fn find_agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.iter().rev().find(|agent| agent.id == agent_id)
    }

    /// Newest agent with the given id, mutably.
    pub fn find_agent_mut(&mut self, agent_id: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().rev().find(|agent| agent.id == agent_id)
    }

    /// The cycle currently open (no `completedAt`), if it is the last one.
    #[must_use]
    pub fn open_cycle(&self) -> Option<&OrchestratorCycle> {
        self.orchestrator_cycles
            .last()
            .filter(|cycle| cycle.completed_at.is_none())
    }

    /// Carried-over prompt from the most recently completed cycle.
    #[must_use]
    pub fn carried_prompt(&self) -> Option<&str> {
        self.orchestrator_cycles
            .iter()
            .rev()
            .find(|cycle| cycle.completed_at.is_some())
            .and_then(|cycle| cycle.next_prompt.as_deref())
    }

    /// Highest numeric suffix among `agent-NNN` ids, or zero.
    #[must_use]
    pub fn max_agent_counter(&self) -> u32 {
        self.agents
            .iter()
            .filter_map(|agent| super::agent::parse_agent_counter(&agent.id))
            .max()
            .unwrap_or(0)
    }
}
