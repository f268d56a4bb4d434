//! Async client for the daemon socket.

use std::path::Path;

use interprocess::local_socket::{tokio::prelude::*, tokio::Stream, GenericFilePath, ToFsName};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::protocol::{IpcResponse, Request};
use crate::{AppError, Result};

/// One open connection; requests on it are answered in order.
pub struct IpcClient {
    reader: BufReader<interprocess::local_socket::tokio::RecvHalf>,
    writer: interprocess::local_socket::tokio::SendHalf,
}

impl IpcClient {
    /// Connect to the daemon listening on `socket_path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if nothing is listening.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let name = socket_path
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| AppError::Ipc(format!("invalid socket path: {err}")))?;
        let stream = Stream::connect(name).await.map_err(|err| {
            AppError::Ipc(format!(
                "cannot connect to {}: {err}",
                socket_path.display()
            ))
        })?;
        let (reader, writer) = stream.split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send a typed request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on transport failure.
    pub async fn request(&mut self, request: &Request) -> Result<IpcResponse> {
        let line = serde_json::to_string(request)
            .map_err(|err| AppError::Ipc(format!("failed to encode request: {err}")))?;
        self.send_line(&line).await
    }

    /// Send one raw line and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on transport failure or if the daemon closed
    /// the connection.
    pub async fn send_line(&mut self, line: &str) -> Result<IpcResponse> {
        let mut payload = line.trim_end().to_owned();
        payload.push('\n');
        self.writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|err| AppError::Ipc(format!("failed to send request: {err}")))?;

        let mut response = String::new();
        let read = self
            .reader
            .read_line(&mut response)
            .await
            .map_err(|err| AppError::Ipc(format!("failed to read response: {err}")))?;
        if read == 0 {
            return Err(AppError::Ipc("daemon closed the connection".into()));
        }
        serde_json::from_str(response.trim())
            .map_err(|err| AppError::Ipc(format!("malformed response: {err}")))
    }
}
