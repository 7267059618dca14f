//! RuntimeClient trait for mocking
//!
//! The controller only talks to the runtime socket through this trait, so
//! tests can swap in `MockRuntimeClient`.

use crate::error::HAProxyError;
use crate::runtime::ServerState;

/// Runtime API operations used by the controller
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait RuntimeClientTrait: Send + Sync {
    /// Sends a raw command and returns the raw response
    async fn execute(&self, command: &str) -> Result<String, HAProxyError>;

    async fn set_server_addr(&self, backend: &str, server: &str, address: &str, port: u16) -> Result<(), HAProxyError>;
    async fn set_server_state(&self, backend: &str, server: &str, state: ServerState) -> Result<(), HAProxyError>;

    /// Replaces the content of a loaded map (`clear map` + `add map` payload)
    async fn set_map_content(&self, map_file: &str, rows: &[(String, String)]) -> Result<(), HAProxyError>;
    async fn show_map(&self, map_file: &str) -> Result<Vec<(String, String)>, HAProxyError>;

    /// `show servers state` output, persisted before reloads
    async fn show_servers_state(&self) -> Result<String, HAProxyError>;
}
