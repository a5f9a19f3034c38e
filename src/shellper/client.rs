//! Orchestrator-side client for a Shellper control socket.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use interprocess::local_socket::tokio::{RecvHalf, SendHalf, Stream};
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::protocol::{ShellperRequest, ShellperResponse, ShellperStatus};
use crate::{AppError, Result};

/// Result of a single connection attempt.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Something accepted the connection.
    Connected(Stream),
    /// The socket file does not exist.
    Missing,
    /// The file exists but nothing is listening.
    Refused,
    /// The attempt did not finish in time.
    TimedOut,
    /// Any other I/O failure.
    Failed(std::io::Error),
}

/// Attempt to connect to `socket_path` within `timeout`.
pub async fn try_connect(socket_path: &Path, timeout: Duration) -> ConnectOutcome {
    if !socket_path.exists() {
        return ConnectOutcome::Missing;
    }
    let name = match socket_path.to_fs_name::<GenericFilePath>() {
        Ok(name) => name,
        Err(err) => return ConnectOutcome::Failed(err),
    };
    match tokio::time::timeout(timeout, Stream::connect(name)).await {
        Err(_) => ConnectOutcome::TimedOut,
        Ok(Ok(stream)) => ConnectOutcome::Connected(stream),
        Ok(Err(err)) => match err.kind() {
            ErrorKind::NotFound => ConnectOutcome::Missing,
            ErrorKind::ConnectionRefused => ConnectOutcome::Refused,
            _ => ConnectOutcome::Failed(err),
        },
    }
}

/// A connected control channel.
pub struct ShellperClient {
    reader: BufReader<RecvHalf>,
    writer: SendHalf,
    timeout: Duration,
}

impl ShellperClient {
    /// Connect to a Shellper.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the socket is missing, refuses, or does not
    /// answer within `timeout`.
    pub async fn connect(socket_path: &Path, timeout: Duration) -> Result<Self> {
        let stream = match try_connect(socket_path, timeout).await {
            ConnectOutcome::Connected(stream) => stream,
            ConnectOutcome::Missing => {
                return Err(AppError::Ipc(format!(
                    "shellper socket {} does not exist",
                    socket_path.display()
                )))
            }
            ConnectOutcome::Refused => {
                return Err(AppError::Ipc(format!(
                    "shellper socket {} refused connection",
                    socket_path.display()
                )))
            }
            ConnectOutcome::TimedOut => {
                return Err(AppError::Ipc(format!(
                    "timed out connecting to {}",
                    socket_path.display()
                )))
            }
            ConnectOutcome::Failed(err) => {
                return Err(AppError::Ipc(format!(
                    "failed to connect to {}: {err}",
                    socket_path.display()
                )))
            }
        };
        let (reader, writer) = stream.split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            timeout,
        })
    }

    /// Send one request and wait for its response payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on I/O failure, timeout, a malformed response,
    /// or an `ok: false` response.
    pub async fn request(&mut self, request: &ShellperRequest) -> Result<serde_json::Value> {
        let mut line = serde_json::to_string(request)
            .map_err(|err| AppError::Ipc(format!("failed to encode request: {err}")))?;
        line.push('\n');

        let exchange = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await?;
            let mut response = String::new();
            let read = self.reader.read_line(&mut response).await?;
            Ok::<_, std::io::Error>((read, response))
        };

        let (read, response) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| AppError::Ipc("shellper did not respond in time".into()))?
            .map_err(|err| AppError::Ipc(format!("shellper i/o failed: {err}")))?;
        if read == 0 {
            return Err(AppError::Ipc("shellper closed the connection".into()));
        }

        let response: ShellperResponse = serde_json::from_str(response.trim())
            .map_err(|err| AppError::Ipc(format!("malformed shellper response: {err}")))?;
        if response.ok {
            Ok(response.data.unwrap_or(serde_json::Value::Null))
        } else {
            Err(AppError::Ipc(
                response
                    .error
                    .unwrap_or_else(|| "shellper reported an error".into()),
            ))
        }
    }

    /// Query child identity.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn status(&mut self) -> Result<ShellperStatus> {
        let value = self.request(&ShellperRequest::Status).await?;
        serde_json::from_value(value)
            .map_err(|err| AppError::Ipc(format!("malformed status payload: {err}")))
    }

    /// Write text to the child's stdin.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn send_input(&mut self, data: &str) -> Result<()> {
        self.request(&ShellperRequest::Input {
            data: data.to_owned(),
        })
        .await
        .map(|_| ())
    }

    /// Fetch retained output.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn replay(&mut self) -> Result<String> {
        let value = self.request(&ShellperRequest::Replay).await?;
        Ok(value
            .get("output")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned())
    }

    /// Ask the Shellper to kill its child and exit.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn terminate(mut self) -> Result<()> {
        self.request(&ShellperRequest::Terminate).await.map(|_| ())
    }
}

/// Connect, send `terminate`, and drop the connection.
///
/// # Errors
///
/// Returns `AppError::Ipc` when the Shellper cannot be reached or refuses.
pub async fn terminate_at(socket_path: &Path, timeout: Duration) -> Result<()> {
    ShellperClient::connect(socket_path, timeout)
        .await?
        .terminate()
        .await
}
