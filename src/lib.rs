#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod driver;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod paths;
pub mod persistence;
pub mod worktree;

pub use config::DaemonConfig;
pub use errors::{AppError, Result};
