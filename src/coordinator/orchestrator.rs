//! Orchestrator controller: render session state, spawn the orchestrator,
//! and close its cycles.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn, Instrument};

use super::registry::ORCHESTRATOR_COLOR;
use super::{agent::best_effort_kill, launch_command, AppState, Launch, ORCHESTRATOR_AGENT_ID};
use crate::config::ProjectConfig;
use crate::models::{
    MergeStatus, OrchestratorCycle, Provider, ReportKind, Session, SessionStatus,
};
use crate::paths;
use crate::{AppError, Result};

/// Prompt used when neither a resume message nor a carried prompt exists.
pub const DEFAULT_CONTINUATION: &str =
    "Review the current session and delegate the next cycle of work.";

const BUILTIN_SYSTEM_PROMPT: &str = "# Sisyphus Orchestrator

You coordinate a team of agents working on the session task. You do not write
code yourself. Each time you are started you receive the current session state.

Each cycle:
1. Read the plan and logs, and review agent reports.
2. Keep the plan current and record decisions in the logs.
3. Delegate work with `sisyphus-ctl spawn --agent-type <type> --name <name> \"<instruction>\"`.
   Add `--worktree` to isolate an agent on its own branch.
4. Track work items with `sisyphus-ctl tasks add|update|list`.
5. Yield with `sisyphus-ctl yield [--prompt \"<hint for next cycle>\"]`. You are
   restarted automatically once every agent has finished.

When the task is fully done, finish with `sisyphus-ctl complete \"<final report>\"`.
";

/// User-message text for a cycle.
#[must_use]
pub fn compose_user_prompt(
    state_block: &str,
    message: Option<&str>,
    carried: Option<&str>,
) -> String {
    match (message, carried) {
        (Some(message), _) => format!(
            "{state_block}\n\nThe user resumed this session with new instructions: {message}"
        ),
        (None, Some(carried)) => format!("{state_block}\n\n{carried}"),
        (None, None) => format!("{state_block}\n\n{DEFAULT_CONTINUATION}"),
    }
}

/// System prompt for `cwd`: the configured file, the project override, or the built-in text.
#[must_use]
pub fn load_system_prompt(cwd: &Path, project: &ProjectConfig) -> String {
    let candidates = project
        .orchestrator_prompt
        .as_ref()
        .map(|p| cwd.join(p))
        .into_iter()
        .chain(std::iter::once(paths::project_orchestrator_prompt_path(cwd)));
    for candidate in candidates {
        match fs::read_to_string(&candidate) {
            Ok(body) => return body,
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %candidate.display(), %err, "unreadable orchestrator prompt");
            }
            Err(_) => {}
        }
    }
    BUILTIN_SYSTEM_PROMPT.to_owned()
}

fn file_ref(path: &Path) -> String {
    if path.exists() {
        format!("@{}", path.display())
    } else {
        "(empty)".to_owned()
    }
}

/// Render the `<state>` block the orchestrator reads at the start of a cycle.
#[must_use]
pub fn format_state(session: &Session, worktree_configured: bool) -> String {
    StateBlock {
        session,
        worktree_configured,
    }
    .to_string()
}

struct StateBlock<'a> {
    session: &'a Session,
    worktree_configured: bool,
}

impl StateBlock<'_> {
    fn write_header(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.session;
        let cwd = session.cwd.as_path();
        writeln!(f, "<state>")?;
        writeln!(
            f,
            "session: {} (cycle {})",
            paths::short_id(&session.id),
            session.orchestrator_cycles.len()
        )?;
        writeln!(f, "task: {}", session.task)?;
        writeln!(f, "status: {}", session.status.as_str())?;
        write!(
            f,
            "\n## Plan\n{}\n\n## Logs\n{}\n",
            file_ref(&paths::plan_path(cwd, &session.id)),
            file_ref(&paths::logs_path(cwd, &session.id))
        )
    }

    fn write_tasks(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n## Tasks")?;
        if self.session.tasks.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for task in &self.session.tasks {
            writeln!(
                f,
                "- {} [{}] {}",
                task.id,
                task.status.as_str(),
                task.description
            )?;
        }
        Ok(())
    }

    fn write_agents(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n## Agents")?;
        if self.session.agents.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for agent in &self.session.agents {
            writeln!(
                f,
                "- {} ({}): {}, {} report(s)",
                agent.id,
                agent.name,
                agent.status.as_str(),
                agent.reports.len()
            )?;
            let mut update = 0;
            for report in &agent.reports {
                let label = match report.kind {
                    ReportKind::Final => "[final]".to_owned(),
                    ReportKind::Update => {
                        update += 1;
                        format!("[update {update:03}]")
                    }
                };
                writeln!(
                    f,
                    "  {label} \"{}\" -> {}",
                    report.summary,
                    report.file_path.display()
                )?;
            }
        }
        Ok(())
    }

    fn write_worktrees(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut isolated = self
            .session
            .agents
            .iter()
            .filter(|a| a.worktree_path.is_some())
            .peekable();
        if isolated.peek().is_none() {
            return Ok(());
        }
        writeln!(f, "\n## Worktrees")?;
        for agent in isolated {
            let branch = agent.branch_name.as_deref().unwrap_or("unknown");
            match agent.merge_status {
                Some(MergeStatus::Conflict) => writeln!(
                    f,
                    "- {}: CONFLICT: {}\n  Branch: {branch}\n  Worktree: {}",
                    agent.id,
                    agent.merge_details.as_deref().unwrap_or("unknown"),
                    agent
                        .worktree_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                )?,
                Some(MergeStatus::NoChanges) => writeln!(
                    f,
                    "- {}: NO CHANGES: agent did not commit any work to branch {branch}",
                    agent.id
                )?,
                status => {
                    let label = status.unwrap_or(MergeStatus::Pending).as_str();
                    writeln!(f, "- {}: {label} (branch {branch})", agent.id)?;
                }
            }
        }
        Ok(())
    }

    fn write_cycles(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n## Previous Cycles")?;
        if self.session.orchestrator_cycles.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for cycle in &self.session.orchestrator_cycles {
            let spawned = if cycle.agents_spawned.is_empty() {
                "(none)".to_owned()
            } else {
                cycle.agents_spawned.join(", ")
            };
            writeln!(f, "Cycle {}: Spawned {spawned}", cycle.cycle)?;
        }
        Ok(())
    }

    fn write_context(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n## Context Files")?;
        let context = context_files(&paths::context_dir(&self.session.cwd, &self.session.id));
        if context.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for name in context {
            writeln!(f, "- {name}")?;
        }

        writeln!(f, "\n## Git Worktrees")?;
        if self.worktree_configured {
            writeln!(
                f,
                "Worktree bootstrap is configured. Pass `--worktree` when spawning agents whose \
                 edits may overlap so each works on its own branch."
            )
        } else {
            writeln!(
                f,
                "No [worktree] section in .sisyphus/config.toml. Agents can still be isolated with \
                 `--worktree`; add the section to bootstrap their checkouts."
            )
        }
    }
}

impl fmt::Display for StateBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_header(f)?;
        self.write_tasks(f)?;
        self.write_agents(f)?;
        self.write_worktrees(f)?;
        self.write_cycles(f)?;
        self.write_context(f)?;
        f.write_str("</state>")
    }
}

fn context_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn prompt_paths(cwd: &Path, session_id: &str, cycle: u32) -> (PathBuf, PathBuf) {
    let dir = paths::prompts_dir(cwd, session_id);
    (
        dir.join(format!("orchestrator-system-{cycle}.md")),
        dir.join(format!("orchestrator-user-{cycle}.md")),
    )
}

/// Spawn the orchestrator for the next cycle.
///
/// `message` (a resume instruction) wins over the prompt carried from the
/// last completed cycle, which wins over [`DEFAULT_CONTINUATION`]. A cycle
/// left open by a vanished orchestrator is closed first.
///
/// # Errors
///
/// Returns `AppError::InvalidState` for a completed session, or the driver
/// or store error that stopped the spawn.
pub async fn spawn(
    state: &AppState,
    session_id: &str,
    cwd: &Path,
    window: &str,
    message: Option<&str>,
) -> Result<OrchestratorCycle> {
    let span = info_span!("spawn_orchestrator", session_id, window);
    async move {
        let mut session = state.store.read(cwd, session_id)?;
        if session.status == SessionStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "session {session_id} is completed"
            )));
        }
        let carried = session.carried_prompt().map(str::to_owned);
        if session.open_cycle().is_some() {
            warn!("closing cycle left open by a previous orchestrator");
            state.store.complete_cycle(cwd, session_id, None).await?;
            session = state.store.read(cwd, session_id)?;
        }

        let project = ProjectConfig::load(cwd);
        let cycle_num = session.orchestrator_cycles.last().map_or(1, |c| c.cycle + 1);
        let state_block = format_state(&session, project.worktree.is_some());
        let user_prompt = compose_user_prompt(&state_block, message, carried.as_deref());
        let (system_path, user_path) = prompt_paths(cwd, session_id, cycle_num);
        for (path, body) in [
            (&system_path, load_system_prompt(cwd, &project)),
            (&user_path, user_prompt),
        ] {
            fs::write(path, body).map_err(|err| {
                AppError::Io(format!("failed to write {}: {err}", path.display()))
            })?;
        }

        let pane_id = state.driver.create_pane(window, cwd).await?;
        let title = format!("orchestrator ({})", paths::short_id(session_id));
        if let Err(err) = state.driver.set_pane_title(&pane_id, &title).await {
            warn!(%pane_id, %err, "failed to set pane title");
        }
        if let Err(err) = state.driver.set_pane_style(&pane_id, ORCHESTRATOR_COLOR).await {
            warn!(%pane_id, %err, "failed to set pane style");
        }

        let cycle = OrchestratorCycle::new(cycle_num, Some(pane_id.clone()));
        if let Err(err) = state.store.add_cycle(cwd, session_id, cycle.clone()).await {
            best_effort_kill(state, &pane_id).await;
            return Err(err);
        }
        state
            .registry
            .set_orchestrator_pane(session_id, Some(&pane_id));

        let model = project.model_for(ORCHESTRATOR_AGENT_ID);
        let command = launch_command(
            &state.config,
            &Launch {
                provider: Provider::detect(model),
                model,
                session_id,
                agent_id: ORCHESTRATOR_AGENT_ID,
                extra_args: Vec::new(),
                system_prompt: &system_path,
                user_prompt: &user_path,
            },
        );
        state.driver.send_keys(&pane_id, &command).await?;

        info!(cycle = cycle_num, %pane_id, "orchestrator spawned");
        Ok(cycle)
    }
    .instrument(span)
    .await
}

/// The orchestrator's pane: the in-memory entry, else the last cycle's record.
fn resolve_pane(state: &AppState, session: &Session) -> Option<String> {
    state.registry.orchestrator_pane(&session.id).or_else(|| {
        session
            .orchestrator_cycles
            .last()
            .and_then(|cycle| cycle.pane_id.clone())
    })
}

/// Forget the orchestrator pane, then kill it.
///
/// The registry entry goes first so a health check racing the kill never
/// mistakes the dying pane for a vanished orchestrator.
async fn teardown_pane(state: &AppState, session: &Session) {
    let pane_id = resolve_pane(state, session);
    state.registry.set_orchestrator_pane(&session.id, None);
    if let Some(pane_id) = pane_id {
        best_effort_kill(state, &pane_id).await;
    }
}

/// Close the current cycle and destroy the orchestrator pane.
///
/// Returns the number of agents still running; zero means the caller should
/// schedule a respawn.
///
/// # Errors
///
/// Propagates store failures.
pub async fn yield_cycle(
    state: &AppState,
    session_id: &str,
    cwd: &Path,
    next_prompt: Option<String>,
) -> Result<usize> {
    let session = state.store.read(cwd, session_id)?;
    teardown_pane(state, &session).await;
    if let Ok(window) = state.registry.window(session_id) {
        if let Err(err) = state.driver.select_layout(&window, "tiled").await {
            warn!(%window, %err, "failed to re-tile window");
        }
    }

    state
        .store
        .complete_cycle(cwd, session_id, next_prompt)
        .await?;
    let running = state.store.read(cwd, session_id)?.running_count();
    info!(session_id, running, "orchestrator yielded");
    Ok(running)
}

/// Close the current cycle, complete the session and tear down the pane.
///
/// # Errors
///
/// Returns `AppError::InvalidState` if the session is already completed.
pub async fn complete(state: &AppState, session_id: &str, cwd: &Path, report: &str) -> Result<()> {
    let session = state.store.read(cwd, session_id)?;
    state.store.complete_cycle(cwd, session_id, None).await?;
    state.store.complete_session(cwd, session_id, report).await?;
    teardown_pane(state, &session).await;
    info!(session_id, "session completed");
    Ok(())
}
