//! Orchestrator-maintained task list entries.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Progress status of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet ready to be worked on.
    Draft,
    /// Ready, not started.
    #[default]
    Pending,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(AppError::InvalidState(format!(
                "invalid task status: {other} (valid: draft, pending, in_progress, done)"
            ))),
        }
    }
}

/// A work item in the session's task list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// `t<N>`, assigned from the list length at insertion.
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
}
