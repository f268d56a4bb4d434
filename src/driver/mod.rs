//! Terminal-multiplexer driver abstraction.
//!
//! The [`ProcessDriver`] trait is the narrow surface the coordinator needs
//! from the multiplexer: create and destroy panes, list which panes are
//! alive, and type a command into a pane. Everything else about the
//! multiplexer stays outside the core.

pub mod tmux;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::Result;

pub use tmux::TmuxDriver;

/// Boxed future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A live pane as reported by the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// Multiplexer pane id (e.g., `%12`).
    pub pane_id: String,
    /// Pid of the pane's root process.
    pub pid: Option<u32>,
}

/// Capability interface over the terminal multiplexer.
pub trait ProcessDriver: Send + Sync {
    /// Split a new pane in `window` whose shell starts in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` if the pane cannot be created.
    fn create_pane<'a>(&'a self, window: &'a str, cwd: &'a Path) -> DriverFuture<'a, String>;

    /// Destroy a pane. Killing an already-gone pane is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` if the multiplexer cannot be reached.
    fn kill_pane<'a>(&'a self, pane_id: &'a str) -> DriverFuture<'a, ()>;

    /// Destroy a whole window. Killing an already-gone window is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` if the multiplexer cannot be reached.
    fn kill_window<'a>(&'a self, window: &'a str) -> DriverFuture<'a, ()>;

    /// Panes currently alive in `window`; empty if the window does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` if the multiplexer cannot be reached.
    fn list_panes<'a>(&'a self, window: &'a str) -> DriverFuture<'a, Vec<PaneInfo>>;

    /// Type `command` into the pane and press enter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` if the keys cannot be delivered.
    fn send_keys<'a>(&'a self, pane_id: &'a str, command: &'a str) -> DriverFuture<'a, ()>;

    /// Set the pane's title.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` on multiplexer failure.
    fn set_pane_title<'a>(&'a self, pane_id: &'a str, title: &'a str) -> DriverFuture<'a, ()>;

    /// Set the pane's border colour.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` on multiplexer failure.
    fn set_pane_style<'a>(&'a self, pane_id: &'a str, color: &'a str) -> DriverFuture<'a, ()>;

    /// Re-arrange panes in `window`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Driver` on multiplexer failure.
    fn select_layout<'a>(&'a self, window: &'a str, layout: &'a str) -> DriverFuture<'a, ()>;
}

/// Quote `raw` for a POSIX shell.
#[must_use]
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
