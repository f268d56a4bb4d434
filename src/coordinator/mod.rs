//! Session coordination engine.
//!
//! [`SessionCoordinator`] is the top-level state machine. It delegates
//! process work to the [`agent`] and [`orchestrator`] controllers, liveness
//! checks to the [`health_monitor`], and keeps its transient indices in the
//! [`registry`].

pub mod agent;
pub mod health_monitor;
pub mod orchestrator;
pub mod registry;
pub mod session_manager;

use std::path::Path;
use std::sync::Arc;

use crate::config::DaemonConfig;
use crate::driver::{shell_quote, ProcessDriver};
use crate::models::Provider;
use crate::persistence::{KnownProjects, StateStore};

pub use health_monitor::{spawn_health_monitor, HealthMonitor};
pub use registry::{PaneEntry, PaneRole, Registry};
pub use session_manager::{SessionCoordinator, SessionSummary};

/// Environment variable carrying the session id into spawned processes.
pub const SESSION_ENV: &str = "SISYPHUS_SESSION_ID";
/// Environment variable carrying the agent id into spawned processes.
pub const AGENT_ENV: &str = "SISYPHUS_AGENT_ID";
/// Agent id the orchestrator process addresses itself with.
pub const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";

/// Shared daemon state handed to every controller.
pub struct AppState {
    pub config: DaemonConfig,
    pub store: StateStore,
    pub driver: Arc<dyn ProcessDriver>,
    pub registry: Registry,
    pub projects: Arc<KnownProjects>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: DaemonConfig,
        store: StateStore,
        driver: Arc<dyn ProcessDriver>,
        projects: Arc<KnownProjects>,
    ) -> Self {
        Self {
            config,
            store,
            driver,
            registry: Registry::default(),
            projects,
        }
    }
}

/// Inputs for the shell line typed into a new pane.
pub(crate) struct Launch<'a> {
    pub provider: Provider,
    pub model: Option<&'a str>,
    pub session_id: &'a str,
    pub agent_id: &'a str,
    /// Extra provider arguments placed before the prompts.
    pub extra_args: Vec<String>,
    pub system_prompt: &'a Path,
    pub user_prompt: &'a Path,
}

/// Build the command line that exports the identity variables and starts
/// the provider CLI with prompts read from their files.
pub(crate) fn launch_command(config: &DaemonConfig, launch: &Launch<'_>) -> String {
    let provider = match launch.provider {
        Provider::Anthropic => &config.anthropic,
        Provider::Openai => &config.openai,
    };

    let mut parts = vec![shell_quote(&provider.command)];
    parts.extend(provider.args.iter().map(|arg| shell_quote(arg)));
    if let Some(model) = launch.model {
        parts.push("--model".into());
        parts.push(shell_quote(model));
    }
    parts.extend(launch.extra_args.iter().map(|arg| shell_quote(arg)));

    let system = shell_quote(&launch.system_prompt.to_string_lossy());
    let user = shell_quote(&launch.user_prompt.to_string_lossy());
    match launch.provider {
        Provider::Anthropic => {
            parts.push("--append-system-prompt".into());
            parts.push(format!("\"$(cat {system})\""));
            parts.push(format!("\"$(cat {user})\""));
        }
        // No separate system prompt flag; both go in the first message.
        Provider::Openai => parts.push(format!("\"$(cat {system}; echo; cat {user})\"")),
    }

    format!(
        "export {SESSION_ENV}={} && export {AGENT_ENV}={} && {}",
        shell_quote(launch.session_id),
        shell_quote(launch.agent_id),
        parts.join(" ")
    )
}
