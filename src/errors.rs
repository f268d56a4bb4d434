//! Error types shared across the daemon.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Kind of entity a [`AppError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// A session id unknown to the daemon or absent on disk.
    Session,
    /// An agent id absent from its session document.
    Agent,
    /// A task id absent from its session document.
    Task,
    /// A session with no known multiplexer window.
    Window,
}

impl Display for NotFoundKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Session => "session",
            Self::Agent => "agent",
            Self::Task => "task",
            Self::Window => "window for session",
        };
        f.write_str(label)
    }
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Session document could not be read, parsed, or written.
    State(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC communication failure.
    Ipc(String),
    /// Terminal-multiplexer command failure.
    Driver(String),
    /// Git command failure.
    Git(String),
    /// Daemon lifecycle failure (pid lock, signalling).
    Daemon(String),
    /// Requested transition or mutation is not allowed in the current state.
    InvalidState(String),
    /// Requested entity does not exist.
    NotFound {
        /// Which kind of entity was looked up.
        kind: NotFoundKind,
        /// The offending identifier.
        id: String,
    },
}

impl AppError {
    /// Shorthand for a [`AppError::NotFound`] value.
    #[must_use]
    pub fn not_found(kind: NotFoundKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error is a not-found of the given kind.
    #[must_use]
    pub fn is_not_found(&self, expected: NotFoundKind) -> bool {
        matches!(self, Self::NotFound { kind, .. } if *kind == expected)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::State(msg) => write!(f, "state: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Driver(msg) => write!(f, "driver: {msg}"),
            Self::Git(msg) => write!(f, "git: {msg}"),
            Self::Daemon(msg) => write!(f, "daemon: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::NotFound { kind, id } => write!(f, "not found: {kind} {id}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::State(err.to_string())
    }
}
