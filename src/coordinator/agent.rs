//! Agent controller: spawn worker processes and record their lifecycle.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use super::{launch_command, AppState, Launch};
use crate::config::ProjectConfig;
use crate::errors::NotFoundKind;
use crate::models::agent::summarize;
use crate::models::{
    Agent, AgentReport, AgentStatus, MergeStatus, Provider, ReportKind, SessionStatus,
};
use crate::{paths, worktree};
use crate::{AppError, Result};

const AGENT_SUFFIX: &str = "# Sisyphus Agent

Session: {{SESSION_ID}}
Agent: {{AGENT_ID}}

You are one worker in a coordinated session. Focus only on the task below.

- Report notable progress with `sisyphus-ctl report \"<message>\"`.
- When finished, submit exactly once with `sisyphus-ctl submit \"<final report>\"`.
  Your pane closes after submitting.

## Task
{{INSTRUCTION}}
";

/// Parameters of an agent spawn.
#[derive(Debug, Clone)]
pub struct SpawnAgent<'a> {
    pub session_id: &'a str,
    pub cwd: &'a Path,
    pub window: &'a str,
    pub agent_type: &'a str,
    pub name: &'a str,
    pub instruction: &'a str,
    /// Run in an isolated git worktree.
    pub worktree: bool,
}

fn render_suffix(session_id: &str, agent_id: &str, instruction: &str) -> String {
    AGENT_SUFFIX
        .replace("{{SESSION_ID}}", session_id)
        .replace("{{AGENT_ID}}", agent_id)
        .replace("{{INSTRUCTION}}", instruction)
}

fn write_prompt(path: &Path, body: &str) -> Result<()> {
    fs::write(path, body)
        .map_err(|err| AppError::Io(format!("failed to write {}: {err}", path.display())))
}

/// Spawn an agent process in a new pane.
///
/// The agent record is persisted before the launch command is typed, so a
/// crash in between still leaves a record the health monitor can resolve.
///
/// # Errors
///
/// Returns `AppError::InvalidState` for a completed session, and
/// `AppError::Git`/`AppError::Driver`/`AppError::State` when a step fails.
#[allow(clippy::too_many_lines)] // Worktree, pane, record and launch steps must stay in order.
pub async fn spawn(state: &AppState, req: SpawnAgent<'_>) -> Result<Agent> {
    let session = state.store.read(req.cwd, req.session_id)?;
    if session.status == SessionStatus::Completed {
        return Err(AppError::InvalidState(format!(
            "session {} is completed",
            req.session_id
        )));
    }

    let agent_id = state.registry.next_agent_id(req.session_id)?;
    let color = state.registry.next_color(req.session_id);
    let span = info_span!("spawn_agent", session_id = req.session_id, agent_id = %agent_id);

    async move {
        let project = ProjectConfig::load(req.cwd);
        let model = project.model_for(req.agent_type);
        let provider = Provider::detect(model);

        let isolated = if req.worktree {
            Some(worktree::create(req.cwd, req.session_id, &agent_id).await?)
        } else {
            None
        };
        let pane_cwd = isolated.as_ref().map_or(req.cwd, |wt| wt.path.as_path());

        let prompts = paths::prompts_dir(req.cwd, req.session_id);
        let system_path = prompts.join(format!("{agent_id}-system.md"));
        let instruction_path = prompts.join(format!("{agent_id}-instruction.md"));
        write_prompt(
            &system_path,
            &render_suffix(req.session_id, &agent_id, req.instruction),
        )?;
        write_prompt(&instruction_path, req.instruction)?;

        let pane_id = state.driver.create_pane(req.window, pane_cwd).await?;
        decorate_pane(state, &pane_id, req.window, &format!("{} ({agent_id})", req.name), color)
            .await;

        let mut agent = Agent::new(
            agent_id.clone(),
            req.name.to_owned(),
            req.agent_type.to_owned(),
            color.to_owned(),
            req.instruction.to_owned(),
            pane_id.clone(),
        );
        agent.provider = provider;
        if let Some(ref wt) = isolated {
            agent.worktree_path = Some(wt.path.clone());
            agent.branch_name = Some(wt.branch.clone());
            agent.merge_status = Some(MergeStatus::Pending);
        }

        let record = agent.clone();
        let persisted = state
            .store
            .mutate(req.cwd, req.session_id, move |session| {
                let id = record.id.clone();
                session.agents.push(record);
                if let Some(cycle) = session.orchestrator_cycles.last_mut() {
                    cycle.agents_spawned.push(id);
                }
                Ok(())
            })
            .await;
        if let Err(err) = persisted {
            best_effort_kill(state, &pane_id).await;
            return Err(err);
        }
        state
            .registry
            .register_pane(&pane_id, req.session_id, &agent_id);

        if let (Some(wt), Some(config)) = (isolated, project.worktree.clone()) {
            let cwd = req.cwd.to_path_buf();
            tokio::spawn(async move { worktree::bootstrap(&cwd, &wt.path, &config).await });
        }

        let extra_args = if req.agent_type.is_empty() || provider == Provider::Openai {
            Vec::new()
        } else {
            vec!["--agent".to_owned(), req.agent_type.to_owned()]
        };
        let command = launch_command(
            &state.config,
            &Launch {
                provider,
                model,
                session_id: req.session_id,
                agent_id: &agent_id,
                extra_args,
                system_prompt: &system_path,
                user_prompt: &instruction_path,
            },
        );
        if let Err(err) = state.driver.send_keys(&pane_id, &command).await {
            warn!(%err, "agent launch failed");
            mark(
                state,
                req.cwd,
                req.session_id,
                &agent_id,
                AgentStatus::Crashed,
                Some(format!("launch failed: {err}")),
            )
            .await?;
            best_effort_kill(state, &pane_id).await;
            return Err(err);
        }

        info!(pane_id = %pane_id, ?provider, "agent spawned");
        Ok(agent)
    }
    .instrument(span)
    .await
}

async fn decorate_pane(state: &AppState, pane_id: &str, window: &str, title: &str, color: &str) {
    if let Err(err) = state.driver.set_pane_title(pane_id, title).await {
        warn!(pane_id, %err, "failed to set pane title");
    }
    if let Err(err) = state.driver.set_pane_style(pane_id, color).await {
        warn!(pane_id, %err, "failed to set pane style");
    }
    if let Err(err) = state.driver.select_layout(window, "tiled").await {
        warn!(window, %err, "failed to re-tile window");
    }
}

pub(crate) async fn best_effort_kill(state: &AppState, pane_id: &str) {
    if let Err(err) = state.driver.kill_pane(pane_id).await {
        warn!(pane_id, %err, "failed to kill pane");
    }
    state.registry.unregister_pane(pane_id);
}

fn report_path(cwd: &Path, session_id: &str, agent_id: &str, suffix: &str) -> PathBuf {
    paths::reports_dir(cwd, session_id).join(format!("{agent_id}-{suffix}.md"))
}

/// Append a progress report without changing the agent's status.
///
/// The body goes to `reports/<agent-id>-<NNN>.md`; the record keeps the path
/// and a one-line summary.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown agent.
pub async fn report(
    state: &AppState,
    cwd: &Path,
    session_id: &str,
    agent_id: &str,
    content: &str,
) -> Result<AgentReport> {
    state
        .store
        .mutate(cwd, session_id, |session| {
            let agent = session
                .find_agent_mut(agent_id)
                .ok_or_else(|| AppError::not_found(NotFoundKind::Agent, agent_id))?;
            let number = agent.reports.len() + 1;
            let path = report_path(cwd, session_id, agent_id, &format!("{number:03}"));
            write_prompt(&path, content)?;
            let report = AgentReport {
                kind: ReportKind::Update,
                file_path: path,
                summary: summarize(content),
                timestamp: Utc::now(),
            };
            agent.reports.push(report.clone());
            Ok(report)
        })
        .await
}

/// Record the final report, complete the agent and close its pane.
///
/// Returns whether every agent in the session is now finished.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown agent, or
/// `AppError::InvalidState` if the agent is no longer running.
pub async fn submit(
    state: &AppState,
    cwd: &Path,
    session_id: &str,
    agent_id: &str,
    content: &str,
) -> Result<bool> {
    let (pane_id, all_done) = state
        .store
        .mutate(cwd, session_id, |session| {
            let agent = session
                .find_agent_mut(agent_id)
                .ok_or_else(|| AppError::not_found(NotFoundKind::Agent, agent_id))?;
            if agent.status != AgentStatus::Running {
                return Err(AppError::InvalidState(format!(
                    "agent {agent_id} is not running"
                )));
            }
            let path = report_path(cwd, session_id, agent_id, "final");
            write_prompt(&path, content)?;
            agent.reports.push(AgentReport {
                kind: ReportKind::Final,
                file_path: path,
                summary: summarize(content),
                timestamp: Utc::now(),
            });
            agent.finish(AgentStatus::Completed, None);
            let pane_id = agent.pane_id.clone();
            Ok((pane_id, session.all_agents_done()))
        })
        .await?;

    best_effort_kill(state, &pane_id).await;
    if let Ok(window) = state.registry.window(session_id) {
        if let Err(err) = state.driver.select_layout(&window, "tiled").await {
            warn!(%window, %err, "failed to re-tile window");
        }
    }
    info!(session_id, agent_id, all_done, "agent submitted");
    Ok(all_done)
}

/// Move a running agent to a terminal status without touching its pane.
///
/// Returns whether the status changed and whether every agent is now finished.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown agent.
pub async fn mark(
    state: &AppState,
    cwd: &Path,
    session_id: &str,
    agent_id: &str,
    status: AgentStatus,
    reason: Option<String>,
) -> Result<(bool, bool)> {
    let (changed, session) = state
        .store
        .finish_agent(cwd, session_id, agent_id, status, reason)
        .await?;
    if changed {
        info!(session_id, agent_id, status = ?status, "agent finished");
    }
    Ok((changed, session.all_agents_done()))
}

/// Mark an agent killed; the caller owns the pane.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown agent.
pub async fn kill(
    state: &AppState,
    cwd: &Path,
    session_id: &str,
    agent_id: &str,
    reason: &str,
) -> Result<bool> {
    let (_, all_done) = mark(
        state,
        cwd,
        session_id,
        agent_id,
        AgentStatus::Killed,
        Some(reason.to_owned()),
    )
    .await?;
    Ok(all_done)
}

/// Store the provider's own session id on the agent record.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown agent.
pub async fn register_provider_session(
    state: &AppState,
    cwd: &Path,
    session_id: &str,
    agent_id: &str,
    provider_session_id: &str,
) -> Result<()> {
    state
        .store
        .update_agent(cwd, session_id, agent_id, |agent| {
            agent.provider_session_id = Some(provider_session_id.to_owned());
        })
        .await
}
