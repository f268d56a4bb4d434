//! Orchestrator cycle model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One orchestrator activation, from spawn to yield/complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorCycle {
    /// 1-based, strictly increasing per session.
    pub cycle: u32,
    /// Spawn time.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Agent ids spawned while this cycle was current.
    #[serde(default)]
    pub agents_spawned: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,
    /// Prompt hint carried into the following cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_prompt: Option<String>,
}

impl OrchestratorCycle {
    #[must_use]
    pub fn new(cycle: u32, pane_id: Option<String>) -> Self {
        Self {
            cycle,
            timestamp: Utc::now(),
            completed_at: None,
            agents_spawned: Vec::new(),
            pane_id,
            next_prompt: None,
        }
    }
}
