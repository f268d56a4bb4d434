#![forbid(unsafe_code)]

//! `sisyphus-ctl`: command-line companion for `sisyphusd`.
//!
//! Turns each subcommand into one protocol request, sends it over the
//! daemon socket, and prints the response payload. Spawned orchestrator and
//! agent processes use it to address the daemon; their identity comes from
//! `SISYPHUS_SESSION_ID` and `SISYPHUS_AGENT_ID`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sisyphus::coordinator::{AGENT_ENV, SESSION_ENV};
use sisyphus::ipc::{IpcClient, Request};
use sisyphus::{paths, AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "sisyphus-ctl",
    about = "Local CLI for the sisyphus daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Daemon socket path (default: ~/.sisyphus/daemon.sock).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Session id (default: $SISYPHUS_SESSION_ID).
    #[arg(long, global = true)]
    session: Option<String>,

    /// Agent id (default: $SISYPHUS_AGENT_ID).
    #[arg(long, global = true)]
    agent: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session in the current directory and tmux window.
    Start {
        /// Task description.
        task: String,
        #[arg(long)]
        tmux_session: Option<String>,
        #[arg(long)]
        tmux_window: Option<String>,
    },
    /// Spawn an agent.
    Spawn {
        /// Instruction for the agent.
        instruction: String,
        #[arg(long, default_value = "")]
        agent_type: String,
        #[arg(long)]
        name: String,
        /// Isolate the agent in its own git worktree.
        #[arg(long)]
        worktree: bool,
    },
    /// Submit the final report of the current agent.
    Submit { report: String },
    /// Send a progress report for the current agent.
    Report { content: String },
    /// End the current orchestrator cycle.
    Yield {
        /// Prompt carried into the next cycle.
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Complete the session.
    Complete { report: String },
    /// Show a session, or check that the daemon is running.
    Status,
    /// List sessions in the current directory.
    List {
        /// Include completed sessions.
        #[arg(long)]
        all: bool,
    },
    /// Resume a paused session in the current tmux window.
    Resume {
        session_id: String,
        /// New instructions for the orchestrator.
        message: Option<String>,
        #[arg(long)]
        tmux_session: Option<String>,
        #[arg(long)]
        tmux_window: Option<String>,
    },
    /// Kill a session and everything it runs.
    Kill { session_id: String },
    /// Report that a pane's process exited (for tmux hooks).
    PaneExited { pane_id: String },
    /// Manage the session task list.
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Record the provider's session id for the current agent.
    RegisterSession { provider_session_id: String },
}

#[derive(Debug, Subcommand)]
enum TaskAction {
    Add {
        description: String,
        #[arg(long)]
        status: Option<String>,
    },
    Update {
        task_id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    List,
}

fn from_env(explicit: Option<String>, var: &str) -> Result<String> {
    explicit
        .or_else(|| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .ok_or_else(|| AppError::Config(format!("missing --{}; ${var} is not set", flag_for(var))))
}

fn flag_for(var: &str) -> &'static str {
    if var == SESSION_ENV {
        "session"
    } else {
        "agent"
    }
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().map_err(|err| AppError::Io(format!("cannot read cwd: {err}")))
}

/// Ask tmux for the current client's session name or window id.
fn tmux_query(explicit: Option<String>, format: &str) -> Result<String> {
    if let Some(value) = explicit {
        return Ok(value);
    }
    let output = std::process::Command::new("tmux")
        .args(["display-message", "-p", format])
        .output()
        .map_err(|err| AppError::Driver(format!("failed to run tmux: {err}")))?;
    let value = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !output.status.success() || value.is_empty() {
        return Err(AppError::Driver(
            "not inside tmux; pass --tmux-session and --tmux-window".into(),
        ));
    }
    Ok(value)
}

fn build_request(cli: Cli) -> Result<Request> {
    let Cli {
        session,
        agent,
        command,
        ..
    } = cli;
    let session_id = || from_env(session.clone(), SESSION_ENV);
    let agent_id = || from_env(agent.clone(), AGENT_ENV);

    let request = match command {
        Command::Start {
            task,
            tmux_session,
            tmux_window,
        } => Request::Start {
            task,
            cwd: current_dir()?,
            tmux_session: tmux_query(tmux_session, "#{session_name}")?,
            tmux_window: tmux_query(tmux_window, "#{window_id}")?,
        },
        Command::Spawn {
            instruction,
            agent_type,
            name,
            worktree,
        } => Request::Spawn {
            session_id: session_id()?,
            agent_type,
            name,
            instruction,
            worktree,
        },
        Command::Submit { report } => Request::Submit {
            session_id: session_id()?,
            agent_id: agent_id()?,
            report,
        },
        Command::Report { content } => Request::Report {
            session_id: session_id()?,
            agent_id: agent_id()?,
            content,
        },
        Command::Yield { prompt } => Request::Yield {
            session_id: session_id()?,
            agent_id: agent_id().ok(),
            next_prompt: prompt,
        },
        Command::Complete { report } => Request::Complete {
            session_id: session_id()?,
            report,
        },
        Command::Status => Request::Status {
            session_id: session_id().ok(),
        },
        Command::List { all } => Request::List {
            cwd: current_dir()?,
            all,
        },
        Command::Resume {
            session_id,
            message,
            tmux_session,
            tmux_window,
        } => Request::Resume {
            session_id,
            cwd: current_dir()?,
            tmux_session: tmux_query(tmux_session, "#{session_name}")?,
            tmux_window: tmux_query(tmux_window, "#{window_id}")?,
            message,
        },
        Command::Kill { session_id } => Request::Kill { session_id },
        Command::PaneExited { pane_id } => Request::PaneExited { pane_id },
        Command::Tasks { action } => match action {
            TaskAction::Add {
                description,
                status,
            } => Request::TasksAdd {
                session_id: session_id()?,
                description,
                status,
            },
            TaskAction::Update {
                task_id,
                status,
                description,
            } => Request::TasksUpdate {
                session_id: session_id()?,
                task_id,
                status,
                description,
            },
            TaskAction::List => Request::TasksList {
                session_id: session_id()?,
            },
        },
        Command::RegisterSession {
            provider_session_id,
        } => Request::RegisterSession {
            session_id: session_id()?,
            agent_id: agent_id()?,
            provider_session_id,
        },
    };
    Ok(request)
}

async fn send(socket: PathBuf, request: Request) -> Result<serde_json::Value> {
    let mut client = IpcClient::connect(&socket).await?;
    let response = client.request(&request).await?;
    if response.ok {
        Ok(response.data.unwrap_or(serde_json::Value::Null))
    } else {
        Err(AppError::Ipc(
            response.error.unwrap_or_else(|| "unknown error".to_owned()),
        ))
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let socket = match args.socket.clone().map_or_else(paths::socket_path, Ok) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let request = match build_request(args) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(send(socket.clone(), request)) {
        Ok(serde_json::Value::Null) => {
            println!("OK");
            ExitCode::SUCCESS
        }
        Ok(data) => {
            println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(AppError::Ipc(message)) if message.starts_with("cannot connect") => {
            eprintln!("Failed to connect to daemon: {message}");
            eprintln!("Is sisyphusd running on '{}'?", socket.display());
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
