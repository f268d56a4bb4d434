//! Wire types for the line-delimited JSON protocol.
//!
//! ## Protocol
//!
//! Request (one JSON object per line, discriminated by `type`):
//! ```json
//! {"type": "start", "task": "ship it", "cwd": "/repo", "tmuxSession": "main", "tmuxWindow": "@3"}
//! {"type": "submit", "sessionId": "…", "agentId": "agent-001", "report": "done"}
//! {"type": "pane-exited", "paneId": "%12"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: session …"}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Inbound request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    /// Create a session and spawn its orchestrator.
    Start {
        task: String,
        cwd: PathBuf,
        tmux_session: String,
        tmux_window: String,
    },
    /// Spawn an agent.
    Spawn {
        session_id: String,
        agent_type: String,
        name: String,
        instruction: String,
        #[serde(default)]
        worktree: bool,
    },
    /// Final report from an agent.
    Submit {
        session_id: String,
        agent_id: String,
        report: String,
    },
    /// Progress report from an agent.
    Report {
        session_id: String,
        agent_id: String,
        content: String,
    },
    /// Orchestrator hands control back.
    Yield {
        session_id: String,
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        next_prompt: Option<String>,
    },
    /// Orchestrator finishes the session.
    Complete { session_id: String, report: String },
    /// Session document, or a liveness answer without `sessionId`.
    Status {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Sessions under a working directory.
    List {
        cwd: PathBuf,
        #[serde(default)]
        all: bool,
    },
    /// Reactivate a session.
    Resume {
        session_id: String,
        cwd: PathBuf,
        tmux_session: String,
        tmux_window: String,
        #[serde(default)]
        message: Option<String>,
    },
    /// Tear a session down.
    Kill { session_id: String },
    /// Multiplexer hook: a pane's process exited.
    #[serde(rename = "pane-exited")]
    PaneExited { pane_id: String },
    TasksAdd {
        session_id: String,
        description: String,
        #[serde(default)]
        status: Option<String>,
    },
    TasksUpdate {
        session_id: String,
        task_id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    TasksList { session_id: String },
    /// Record the provider's own session id on an agent.
    RegisterSession {
        session_id: String,
        agent_id: String,
        provider_session_id: String,
    },
}

impl Request {
    /// Every `type` value the server understands.
    pub const TYPES: [&'static str; 15] = [
        "start",
        "spawn",
        "submit",
        "report",
        "yield",
        "complete",
        "status",
        "list",
        "resume",
        "kill",
        "pane-exited",
        "tasks_add",
        "tasks_update",
        "tasks_list",
        "register_session",
    ];

    /// Wire name of this request's `type`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Spawn { .. } => "spawn",
            Self::Submit { .. } => "submit",
            Self::Report { .. } => "report",
            Self::Yield { .. } => "yield",
            Self::Complete { .. } => "complete",
            Self::Status { .. } => "status",
            Self::List { .. } => "list",
            Self::Resume { .. } => "resume",
            Self::Kill { .. } => "kill",
            Self::PaneExited { .. } => "pane-exited",
            Self::TasksAdd { .. } => "tasks_add",
            Self::TasksUpdate { .. } => "tasks_update",
            Self::TasksList { .. } => "tasks_list",
            Self::RegisterSession { .. } => "register_session",
        }
    }

    /// Parse one request line.
    ///
    /// # Errors
    ///
    /// Returns a message distinguishing invalid JSON, a missing or unknown
    /// `type`, and malformed fields.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|err| format!("invalid json: {err}"))?;
        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err("missing request type".to_owned());
        };
        if !Self::TYPES.contains(&kind) {
            return Err(format!("unknown request type: {kind}"));
        }
        let kind = kind.to_owned();
        serde_json::from_value(value).map_err(|err| format!("invalid {kind} request: {err}"))
    }
}

/// Outbound response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Success without a payload.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
