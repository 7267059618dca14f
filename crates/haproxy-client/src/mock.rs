//! Mock RuntimeClient for unit testing
//!
//! Records every runtime command instead of talking to HAProxy. Failures
//! can be injected per command prefix to exercise the reload fallback.

use crate::error::HAProxyError;
use crate::runtime::{map_payload, ServerState};
use crate::runtime_trait::RuntimeClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock RuntimeClient for testing
#[derive(Clone, Debug, Default)]
pub struct MockRuntimeClient {
    pub(crate) commands: Arc<Mutex<Vec<String>>>,
    pub(crate) failures: Arc<Mutex<Vec<String>>>,
    pub(crate) maps: Arc<Mutex<HashMap<String, Vec<(String, String)>>>>,
    pub(crate) servers_state: Arc<Mutex<String>>,
}

impl MockRuntimeClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands whose text starts with `prefix` fail with a runtime error
    pub fn fail_on(&self, prefix: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(prefix.into());
        }
    }

    /// Removes every injected failure
    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Output returned by `show servers state`
    pub fn set_servers_state(&self, state: impl Into<String>) {
        if let Ok(mut servers_state) = self.servers_state.lock() {
            *servers_state = state.into();
        }
    }

    /// Every command received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Forgets recorded commands
    pub fn clear_commands(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.clear();
        }
    }

    /// Last content pushed to a map
    pub fn map(&self, map_file: &str) -> Option<Vec<(String, String)>> {
        self.maps.lock().ok().and_then(|maps| maps.get(map_file).cloned())
    }

    fn record(&self, command: String) -> Result<String, HAProxyError> {
        let failed = self
            .failures
            .lock()
            .map(|failures| failures.iter().any(|prefix| command.starts_with(prefix.as_str())))
            .unwrap_or(false);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        if failed {
            return Err(HAProxyError::Runtime(format!("injected failure: {command}")));
        }
        Ok(String::new())
    }
}

#[async_trait::async_trait]
impl RuntimeClientTrait for MockRuntimeClient {
    async fn execute(&self, command: &str) -> Result<String, HAProxyError> {
        self.record(command.to_string())
    }

    async fn set_server_addr(&self, backend: &str, server: &str, address: &str, port: u16) -> Result<(), HAProxyError> {
        self.record(format!("set server {backend}/{server} addr {address} port {port}"))
            .map(|_| ())
    }

    async fn set_server_state(&self, backend: &str, server: &str, state: ServerState) -> Result<(), HAProxyError> {
        self.record(format!("set server {backend}/{server} state {}", state.as_str()))
            .map(|_| ())
    }

    async fn set_map_content(&self, map_file: &str, rows: &[(String, String)]) -> Result<(), HAProxyError> {
        self.record(format!("clear map {map_file}"))?;
        if !rows.is_empty() {
            self.record(format!("add map {map_file} <<\n{}\n", map_payload(rows)))?;
        }
        if let Ok(mut maps) = self.maps.lock() {
            maps.insert(map_file.to_string(), rows.to_vec());
        }
        Ok(())
    }

    async fn show_map(&self, map_file: &str) -> Result<Vec<(String, String)>, HAProxyError> {
        self.record(format!("show map {map_file}"))?;
        Ok(self.map(map_file).unwrap_or_default())
    }

    async fn show_servers_state(&self) -> Result<String, HAProxyError> {
        self.record("show servers state".to_string())?;
        Ok(self.servers_state.lock().map(|s| s.clone()).unwrap_or_default())
    }
}
