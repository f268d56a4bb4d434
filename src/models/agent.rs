//! Agent model: one spawned worker process and its reports.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for an agent. Every value except `Running` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Process believed alive in its pane.
    Running,
    /// Submitted a final report.
    Completed,
    /// Killed explicitly.
    Killed,
    /// Process failed on its own.
    Crashed,
    /// Pane vanished without a lifecycle event.
    Lost,
}

impl AgentStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }

    /// Lowercase label as persisted.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Killed => "killed",
            Self::Crashed => "crashed",
            Self::Lost => "lost",
        }
    }
}

/// Execution backend an agent runs on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Claude CLI.
    #[default]
    Anthropic,
    /// Codex CLI.
    Openai,
}

impl Provider {
    /// Infer the provider from a configured model name.
    ///
    /// `gpt-*`, `o<digit>-*` and `codex-*` models run on OpenAI, anything
    /// else (including no model) on Anthropic.
    #[must_use]
    pub fn detect(model: Option<&str>) -> Self {
        let Some(model) = model else {
            return Self::Anthropic;
        };
        let reasoning_series = model
            .strip_prefix('o')
            .and_then(|rest| rest.split_once('-'))
            .is_some_and(|(digits, _)| {
                !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
            });
        if model.starts_with("gpt-") || model.starts_with("codex-") || reasoning_series {
            Self::Openai
        } else {
            Self::Anthropic
        }
    }
}

/// Kind of an agent report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Intermediate progress.
    Update,
    /// The single closing report written on submit.
    Final,
}

/// Pointer to a persisted report body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentReport {
    /// Update or final.
    #[serde(rename = "type")]
    pub kind: ReportKind,
    /// Where the full body lives.
    pub file_path: PathBuf,
    /// First line of the body, truncated.
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of merging an isolated agent branch back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStatus {
    /// Not merged yet.
    Pending,
    /// Merged with a merge commit.
    Merged,
    /// Branch had no commits ahead of the merge base.
    NoChanges,
    /// Merge failed and was aborted; worktree kept for manual resolution.
    Conflict,
}

impl MergeStatus {
    /// Label as persisted.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Merged => "merged",
            Self::NoChanges => "no-changes",
            Self::Conflict => "conflict",
        }
    }
}

/// One spawned worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// `agent-NNN`, unique within its session.
    pub id: String,
    pub name: String,
    /// Caller-supplied role.
    pub agent_type: String,
    #[serde(default)]
    pub provider: Provider,
    /// Provider-side session id, registered by the process itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    /// Pane border colour.
    pub color: String,
    pub instruction: String,
    pub status: AgentStatus,
    pub spawned_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only.
    #[serde(default)]
    pub reports: Vec<AgentReport>,
    pub pane_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_status: Option<MergeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_details: Option<String>,
}

impl Agent {
    /// Construct a freshly spawned, running agent.
    #[must_use]
    pub fn new(
        id: String,
        name: String,
        agent_type: String,
        color: String,
        instruction: String,
        pane_id: String,
    ) -> Self {
        Self {
            id,
            name,
            agent_type,
            provider: Provider::Anthropic,
            provider_session_id: None,
            color,
            instruction,
            status: AgentStatus::Running,
            spawned_at: Utc::now(),
            completed_at: None,
            reports: Vec::new(),
            pane_id,
            killed_reason: None,
            worktree_path: None,
            branch_name: None,
            merge_status: None,
            merge_details: None,
        }
    }

    /// Move a running agent to a terminal status.
    ///
    /// Returns `false` (and changes nothing) if the agent already left
    /// `running`; terminal statuses never transition again.
    pub fn finish(&mut self, status: AgentStatus, reason: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        if reason.is_some() {
            self.killed_reason = reason;
        }
        true
    }

    #[must_use]
    pub fn has_final_report(&self) -> bool {
        self.reports.iter().any(|r| r.kind == ReportKind::Final)
    }

    /// Whether this agent has an isolated worktree awaiting merge.
    #[must_use]
    pub fn merge_pending(&self) -> bool {
        self.worktree_path.is_some() && self.merge_status == Some(MergeStatus::Pending)
    }
}

/// Format a per-session counter value as an agent id.
#[must_use]
pub fn format_agent_id(counter: u32) -> String {
    format!("agent-{counter:03}")
}

/// Parse the counter out of an `agent-NNN` id.
#[must_use]
pub fn parse_agent_counter(agent_id: &str) -> Option<u32> {
    agent_id.strip_prefix("agent-")?.parse().ok()
}

/// Short single-line summary of a report body.
#[must_use]
pub fn summarize(content: &str) -> String {
    const MAX: usize = 120;
    let first = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    if first.chars().count() <= MAX {
        first.to_owned()
    } else {
        let truncated: String = first.chars().take(MAX - 3).collect();
        format!("{truncated}...")
    }
}
