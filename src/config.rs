//! Daemon and per-project configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::paths;
use crate::{AppError, Result};

/// Launch command for one execution provider.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProviderCommand {
    /// Binary to run inside the pane (e.g., `claude`).
    pub command: String,
    /// Arguments placed before the prompt arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_anthropic() -> ProviderCommand {
    ProviderCommand {
        command: "claude".into(),
        args: vec!["--dangerously-skip-permissions".into()],
    }
}

fn default_openai() -> ProviderCommand {
    ProviderCommand {
        command: "codex".into(),
        args: vec!["--dangerously-bypass-approvals-and-sandbox".into()],
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_respawn_delay_ms() -> u64 {
    2000
}

fn default_retention_days() -> u32 {
    30
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

/// Daemon-wide configuration parsed from `~/.sisyphus/config.toml`.
///
/// Every field has a default, so a missing file yields a usable config.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DaemonConfig {
    /// Health-monitor polling interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between a respawn trigger and the orchestrator actually starting.
    #[serde(default = "default_respawn_delay_ms")]
    pub respawn_delay_ms: u64,
    /// Days a completed session is kept before its directory is pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Grace period before a stopping daemon is force-killed.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Override for the IPC socket location.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    /// Launch command for Anthropic-backed processes.
    #[serde(default = "default_anthropic")]
    pub anthropic: ProviderCommand,
    /// Launch command for OpenAI-backed processes.
    #[serde(default = "default_openai")]
    pub openai: ProviderCommand,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            respawn_delay_ms: default_respawn_delay_ms(),
            retention_days: default_retention_days(),
            stop_timeout_ms: default_stop_timeout_ms(),
            socket_path: None,
            anthropic: default_anthropic(),
            openai: default_openai(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file exists but cannot be read,
    /// contains invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective IPC socket path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no override is set and the global
    /// directory cannot be resolved.
    pub fn socket_path(&self) -> Result<PathBuf> {
        match self.socket_path {
            Some(ref path) => Ok(path.clone()),
            None => paths::socket_path(),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_delay_ms)
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.anthropic.command.trim().is_empty() || self.openai.command.trim().is_empty() {
            return Err(AppError::Config(
                "provider command must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Optional bootstrap steps applied to a freshly created agent worktree.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorktreeConfig {
    /// Paths deep-copied from the repository into the worktree.
    #[serde(default)]
    pub copy: Vec<String>,
    /// Paths cloned copy-on-write where the filesystem supports it.
    #[serde(default)]
    pub clone: Vec<String>,
    /// Paths symlinked back to the repository.
    #[serde(default)]
    pub symlink: Vec<String>,
    /// Shell command run inside the worktree after the file steps.
    #[serde(default)]
    pub init: Option<String>,
}

/// Per-project configuration read from `<cwd>/.sisyphus/config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProjectConfig {
    /// Replacement for the built-in orchestrator system prompt.
    #[serde(default)]
    pub orchestrator_prompt: Option<PathBuf>,
    /// Model name per agent type; selects the execution provider.
    #[serde(default)]
    pub agent_models: HashMap<String, String>,
    /// Worktree bootstrap configuration; `None` disables bootstrap.
    #[serde(default)]
    pub worktree: Option<WorktreeConfig>,
}

impl ProjectConfig {
    /// Load the project config for `cwd`.
    ///
    /// A missing or unparsable file yields the default config; parse
    /// failures are logged rather than failing the caller's request.
    #[must_use]
    pub fn load(cwd: &Path) -> Self {
        let path = paths::project_config_path(cwd);
        let Ok(raw) = fs::read_to_string(&path) else {
            return Self::default();
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring invalid project config");
                Self::default()
            }
        }
    }

    /// Model configured for `agent_type`, if any.
    #[must_use]
    pub fn model_for(&self, agent_type: &str) -> Option<&str> {
        self.agent_models.get(agent_type).map(String::as_str)
    }
}
