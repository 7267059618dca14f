//! HAProxy run as a child process in master-worker mode.

use super::{run_checked, save_server_state, CommandRunner, Process};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use haproxy_client::{runtime::response_error, RuntimeClient, RuntimeClientTrait};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Time given to workers to finish after soft-stop.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Supervisor owning the HAProxy master process.
pub struct Direct {
    binary: PathBuf,
    main_config: PathBuf,
    aux_config: PathBuf,
    master_socket: PathBuf,
    state_file: PathBuf,
    master: RuntimeClient,
    runtime: Arc<dyn RuntimeClientTrait>,
    runner: Arc<dyn CommandRunner>,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for Direct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Direct")
            .field("binary", &self.binary)
            .field("main_config", &self.main_config)
            .finish_non_exhaustive()
    }
}

impl Direct {
    pub fn new(config: &ControllerConfig, runtime: Arc<dyn RuntimeClientTrait>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: config.haproxy_binary.clone(),
            main_config: config.main_config_file(),
            aux_config: config.aux_config_file(),
            master_socket: config.master_socket(),
            state_file: config.server_state_file(),
            master: RuntimeClient::new(config.master_socket()),
            runtime,
            runner,
            child: Mutex::new(None),
        }
    }

    /// Command line of the master process. The auxiliary file is loaded
    /// only when it exists.
    fn start_args(&self, aux_exists: bool) -> Vec<String> {
        let mut args = vec![
            "-W".to_string(),
            "-S".to_string(),
            format!("{},level,admin", self.master_socket.to_string_lossy()),
            "-f".to_string(),
            self.main_config.to_string_lossy().into_owned(),
        ];
        if aux_exists {
            args.push("-f".to_string());
            args.push(self.aux_config.to_string_lossy().into_owned());
        }
        args
    }

    /// True while the master process is alive.
    async fn running(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!(%status, "haproxy exited");
                *child = None;
                false
            }
            Some(Err(e)) => {
                warn!("failed to poll haproxy: {}", e);
                false
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl Process for Direct {
    async fn start(&self) -> Result<(), ControllerError> {
        if self.running().await {
            return Ok(());
        }
        let aux_exists = tokio::fs::try_exists(&self.aux_config).await.unwrap_or(false);
        let args = self.start_args(aux_exists);
        info!(binary = %self.binary.display(), "starting haproxy");
        let child = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| ControllerError::Process(format!("failed to start {}: {e}", self.binary.display())))?;
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ControllerError> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };
        let Some(pid) = child.id() else {
            *guard = None;
            return Ok(());
        };
        info!(pid, "stopping haproxy");
        run_checked(self.runner.as_ref(), "kill", &["-USR1".to_string(), pid.to_string()]).await?;
        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "haproxy stopped"),
            Ok(Err(e)) => warn!("failed to wait for haproxy: {}", e),
            Err(_elapsed) => {
                warn!("haproxy did not stop in {:?}, killing", STOP_TIMEOUT);
                child.start_kill()?;
            }
        }
        *guard = None;
        Ok(())
    }

    async fn reload(&self) -> Result<(), ControllerError> {
        if !self.running().await {
            return self.start().await;
        }
        save_server_state(self.runtime.as_ref(), &self.state_file).await;
        let response = self.master.execute("reload").await?;
        if let Some(message) = response_error(&response) {
            return Err(ControllerError::Process(format!("reload failed: {message}")));
        }
        if response.contains("Success=0") {
            return Err(ControllerError::Process(format!("reload failed: {}", response.trim())));
        }
        info!("haproxy reloaded");
        Ok(())
    }

    async fn restart(&self) -> Result<(), ControllerError> {
        save_server_state(self.runtime.as_ref(), &self.state_file).await;
        self.stop().await?;
        self.start().await
    }
}
