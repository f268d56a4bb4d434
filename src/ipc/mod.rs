//! Local IPC layer for `sisyphus-ctl` interaction.
//!
//! Provides a Unix domain socket (named pipe on Windows) server that
//! accepts JSON-line requests, plus the matching client.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{IpcResponse, Request};
pub use server::spawn_ipc_server;
