//! HAProxy runtime API client
//!
//! One connection per command over the master-less runtime socket
//! (`stats socket ... level admin`). HAProxy answers and closes the
//! connection when the client half-closes after the command.

use crate::error::HAProxyError;
use crate::runtime_trait::RuntimeClientTrait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// Operational state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Ready,
    Maint,
    Drain,
}

impl ServerState {
    /// Keyword used by `set server ... state`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Maint => "maint",
            Self::Drain => "drain",
        }
    }
}

/// Prefixes HAProxy uses for failed runtime commands.
const ERROR_PREFIXES: &[&str] = &[
    "Unknown command",
    "No such",
    "Require",
    "Permission denied",
    "Can't",
    "Cannot",
    "Invalid",
    "Missing",
    "Unknown map",
    "Unknown ACL",
    "'set server",
    "'clear map",
    "'add map",
    "Out of memory",
];

/// Returns the HAProxy error message contained in `response`, if any.
pub fn response_error(response: &str) -> Option<&str> {
    let trimmed = response.trim();
    ERROR_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
        .then_some(trimmed)
}

/// Formats map rows as a runtime `add map` payload (`key value` per line).
pub fn map_payload(rows: &[(String, String)]) -> String {
    let mut payload = String::new();
    for (key, value) in rows {
        payload.push_str(key);
        payload.push(' ');
        payload.push_str(value);
        payload.push('\n');
    }
    payload
}

/// Runtime socket client.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    socket: PathBuf,
    timeout: Duration,
}

impl RuntimeClient {
    /// Client for the socket at `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Overrides the per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the runtime socket.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn roundtrip(&self, command: &str) -> Result<String, HAProxyError> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        stream.write_all(command.as_bytes()).await?;
        if !command.ends_with('\n') {
            stream.write_all(b"\n").await?;
        }
        stream.shutdown().await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    async fn checked(&self, command: &str) -> Result<String, HAProxyError> {
        let response = self.execute(command).await?;
        if let Some(message) = response_error(&response) {
            warn!(command = %command.lines().next().unwrap_or_default(), "runtime command failed: {}", message);
            return Err(HAProxyError::Runtime(message.to_string()));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl RuntimeClientTrait for RuntimeClient {
    async fn execute(&self, command: &str) -> Result<String, HAProxyError> {
        debug!(command = %command.lines().next().unwrap_or_default(), "runtime command");
        tokio::time::timeout(self.timeout, self.roundtrip(command))
            .await
            .map_err(|_elapsed| {
                HAProxyError::Runtime(format!(
                    "timeout after {:?} on {}",
                    self.timeout,
                    self.socket.display()
                ))
            })?
    }

    async fn set_server_addr(&self, backend: &str, server: &str, address: &str, port: u16) -> Result<(), HAProxyError> {
        self.checked(&format!("set server {backend}/{server} addr {address} port {port}"))
            .await
            .map(|_| ())
    }

    async fn set_server_state(&self, backend: &str, server: &str, state: ServerState) -> Result<(), HAProxyError> {
        self.checked(&format!("set server {backend}/{server} state {}", state.as_str()))
            .await
            .map(|_| ())
    }

    async fn set_map_content(&self, map_file: &str, rows: &[(String, String)]) -> Result<(), HAProxyError> {
        self.checked(&format!("clear map {map_file}")).await?;
        if rows.is_empty() {
            return Ok(());
        }
        self.checked(&format!("add map {map_file} <<\n{}\n", map_payload(rows)))
            .await
            .map(|_| ())
    }

    async fn show_map(&self, map_file: &str) -> Result<Vec<(String, String)>, HAProxyError> {
        let response = self.checked(&format!("show map {map_file}")).await?;
        Ok(response
            .lines()
            .filter_map(|line| {
                // "<id> <key> <value>"
                let mut parts = line.splitn(3, ' ');
                let _id = parts.next()?;
                let key = parts.next()?;
                let value = parts.next().unwrap_or_default();
                Some((key.to_string(), value.to_string()))
            })
            .collect())
    }

    async fn show_servers_state(&self) -> Result<String, HAProxyError> {
        self.checked("show servers state").await
    }
}
