//! `tmux`-backed [`ProcessDriver`].

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::debug;

use super::{DriverFuture, PaneInfo, ProcessDriver};
use crate::{AppError, Result};

/// Drives a local `tmux` server by shelling out to the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxDriver {
    binary: String,
}

impl Default for TmuxDriver {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxDriver {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Spawn tmux and collect its output. Only a failure to start is an error.
    async fn exec(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Driver(format!("failed to run tmux: {err}")))
    }

    /// Run tmux and return trimmed stdout, failing on a non-zero exit.
    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(stdout_of(&output))
        } else {
            Err(AppError::Driver(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Run tmux, treating a non-zero exit as success (target already gone).
    async fn run_lenient(&self, args: &[&str]) -> Result<()> {
        let output = self.exec(args).await?;
        if !output.status.success() {
            debug!(
                command = args.first().copied().unwrap_or_default(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tmux command had no effect"
            );
        }
        Ok(())
    }
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

fn parse_panes(raw: &str) -> Vec<PaneInfo> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pane_id = parts.next()?.to_owned();
            let pid = parts.next().and_then(|p| p.parse().ok());
            Some(PaneInfo { pane_id, pid })
        })
        .collect()
}

impl ProcessDriver for TmuxDriver {
    fn create_pane<'a>(&'a self, window: &'a str, cwd: &'a Path) -> DriverFuture<'a, String> {
        Box::pin(async move {
            let cwd = cwd.to_string_lossy();
            let pane_id = self
                .run(&[
                    "split-window",
                    "-h",
                    "-t",
                    window,
                    "-c",
                    &cwd,
                    "-P",
                    "-F",
                    "#{pane_id}",
                ])
                .await?;
            if pane_id.is_empty() {
                return Err(AppError::Driver("tmux returned no pane id".into()));
            }
            Ok(pane_id)
        })
    }

    fn kill_pane<'a>(&'a self, pane_id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.run_lenient(&["kill-pane", "-t", pane_id]).await })
    }

    fn kill_window<'a>(&'a self, window: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.run_lenient(&["kill-window", "-t", window]).await })
    }

    fn list_panes<'a>(&'a self, window: &'a str) -> DriverFuture<'a, Vec<PaneInfo>> {
        Box::pin(async move {
            let output = self
                .exec(&["list-panes", "-t", window, "-F", "#{pane_id} #{pane_pid}"])
                .await?;
            // A missing window lists no panes.
            if !output.status.success() {
                return Ok(Vec::new());
            }
            Ok(parse_panes(&stdout_of(&output)))
        })
    }

    fn send_keys<'a>(&'a self, pane_id: &'a str, command: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.run(&["send-keys", "-t", pane_id, command, "Enter"])
                .await
                .map(|_| ())
        })
    }

    fn set_pane_title<'a>(&'a self, pane_id: &'a str, title: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.run_lenient(&["select-pane", "-t", pane_id, "-T", title])
                .await
        })
    }

    fn set_pane_style<'a>(&'a self, pane_id: &'a str, color: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let style = format!("border-style=fg={}", normalize_color(color));
            self.run_lenient(&["select-pane", "-t", pane_id, "-P", &style])
                .await
        })
    }

    fn select_layout<'a>(&'a self, window: &'a str, layout: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.run_lenient(&["select-layout", "-t", window, layout]).await })
    }
}

/// Map palette names tmux does not know to its `colourN` form.
fn normalize_color(color: &str) -> &str {
    match color {
        "orange" => "colour208",
        "teal" => "colour6",
        other => other,
    }
}
