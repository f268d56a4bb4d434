//! Local IPC server for `sisyphus-ctl` and the processes the daemon spawns.
//!
//! Listens on a Unix domain socket (a named pipe on Windows) using the
//! `interprocess` crate. Each connection carries any number of request
//! lines; every line gets exactly one response line, and a bad request
//! never closes the connection.

use std::path::{Path, PathBuf};

use interprocess::local_socket::{
    tokio::prelude::*, GenericFilePath, ListenerOptions, ToFsName,
};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::protocol::{IpcResponse, Request};
use crate::coordinator::SessionCoordinator;
use crate::models::TaskStatus;
use crate::{AppError, Result};

/// Spawn the IPC server task on `socket_path`.
///
/// A stale socket file left by a previous daemon is removed first; the file
/// is removed again when the server shuts down.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    coordinator: SessionCoordinator,
    socket_path: &Path,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .map_err(|err| AppError::Ipc(format!("failed to remove stale socket: {err}")))?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::Ipc(format!("failed to create socket dir: {err}")))?;
    }

    let listener_name = socket_path
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| {
            AppError::Ipc(format!(
                "invalid ipc socket path '{}': {err}",
                socket_path.display()
            ))
        })?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    let path: PathBuf = socket_path.to_path_buf();
    info!(socket = %path.display(), "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", socket = %path.display());
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, coordinator.clone()));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
            drop(listener);
            if let Err(err) = std::fs::remove_file(&path) {
                debug!(%err, "socket file already gone");
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    coordinator: SessionCoordinator,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match Request::parse(trimmed) {
                        Ok(request) => dispatch(request, &coordinator).await,
                        Err(message) => IpcResponse::error(message),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        debug!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route a request to the coordinator and wrap the outcome.
pub async fn dispatch(request: Request, coordinator: &SessionCoordinator) -> IpcResponse {
    let span = info_span!("ipc_command", kind = request.kind());
    match handle(request, coordinator).instrument(span).await {
        Ok(Some(data)) => IpcResponse::success(data),
        Ok(None) => IpcResponse::empty(),
        Err(err) => {
            warn!(%err, "ipc request failed");
            IpcResponse::error(err.to_string())
        }
    }
}

fn parse_status(raw: Option<&str>) -> Result<Option<TaskStatus>> {
    raw.map(str::parse::<TaskStatus>).transpose()
}

#[allow(clippy::too_many_lines)] // One match arm per request type.
async fn handle(
    request: Request,
    coordinator: &SessionCoordinator,
) -> Result<Option<serde_json::Value>> {
    let data = match request {
        Request::Start {
            task,
            cwd,
            tmux_session,
            tmux_window,
        } => {
            let session = coordinator
                .start(&task, &cwd, &tmux_session, &tmux_window)
                .await?;
            Some(json!({ "sessionId": session.id }))
        }
        Request::Spawn {
            session_id,
            agent_type,
            name,
            instruction,
            worktree,
        } => {
            let agent_id = coordinator
                .spawn_agent(&session_id, &agent_type, &name, &instruction, worktree)
                .await?;
            Some(json!({ "agentId": agent_id }))
        }
        Request::Submit {
            session_id,
            agent_id,
            report,
        } => {
            let all_done = coordinator.submit(&session_id, &agent_id, &report).await?;
            Some(json!({ "allAgentsDone": all_done }))
        }
        Request::Report {
            session_id,
            agent_id,
            content,
        } => {
            coordinator.report(&session_id, &agent_id, &content).await?;
            None
        }
        Request::Yield {
            session_id,
            next_prompt,
            ..
        } => {
            coordinator.yield_cycle(&session_id, next_prompt).await?;
            None
        }
        Request::Complete { session_id, report } => {
            coordinator.complete(&session_id, &report).await?;
            None
        }
        Request::Status { session_id: None } => Some(json!({ "message": "daemon running" })),
        Request::Status {
            session_id: Some(session_id),
        } => {
            let session = coordinator.status(&session_id)?;
            Some(json!({ "session": session }))
        }
        Request::List { cwd, all } => {
            Some(json!({ "sessions": coordinator.list(&cwd, all) }))
        }
        Request::Resume {
            session_id,
            cwd,
            tmux_session,
            tmux_window,
            message,
        } => {
            let session = coordinator
                .resume(
                    &session_id,
                    &cwd,
                    &tmux_session,
                    &tmux_window,
                    message.as_deref(),
                )
                .await?;
            Some(json!({ "sessionId": session.id, "status": session.status }))
        }
        Request::Kill { session_id } => {
            let killed = coordinator.kill(&session_id).await?;
            Some(json!({ "killedAgents": killed }))
        }
        Request::PaneExited { pane_id } => {
            let handled = coordinator.pane_exited(&pane_id).await?;
            Some(json!({ "handled": handled }))
        }
        Request::TasksAdd {
            session_id,
            description,
            status,
        } => {
            let status = parse_status(status.as_deref())?;
            let task = coordinator
                .add_task(&session_id, &description, status)
                .await?;
            Some(json!({ "taskId": task.id }))
        }
        Request::TasksUpdate {
            session_id,
            task_id,
            status,
            description,
        } => {
            let status = parse_status(status.as_deref())?;
            coordinator
                .update_task(&session_id, &task_id, status, description)
                .await?;
            None
        }
        Request::TasksList { session_id } => {
            Some(json!({ "tasks": coordinator.tasks(&session_id)? }))
        }
        Request::RegisterSession {
            session_id,
            agent_id,
            provider_session_id,
        } => {
            coordinator
                .register_provider_session(&session_id, &agent_id, &provider_session_id)
                .await?;
            None
        }
    };
    Ok(data)
}
