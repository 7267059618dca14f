//! HAProxy managed by s6-overlay.

use super::{run_checked, save_server_state, CommandRunner, Process};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use haproxy_client::RuntimeClientTrait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const S6_SVC: &str = "s6-svc";

/// Sends control commands to the HAProxy s6 service directory.
pub struct S6 {
    service_dir: PathBuf,
    state_file: PathBuf,
    runtime: Arc<dyn RuntimeClientTrait>,
    runner: Arc<dyn CommandRunner>,
}

impl S6 {
    pub fn new(config: &ControllerConfig, runtime: Arc<dyn RuntimeClientTrait>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            service_dir: config.s6_service_dir.clone(),
            state_file: config.server_state_file(),
            runtime,
            runner,
        }
    }

    async fn svc(&self, flag: &str) -> Result<(), ControllerError> {
        let args = vec![flag.to_string(), self.service_dir.to_string_lossy().into_owned()];
        run_checked(self.runner.as_ref(), S6_SVC, &args).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl Process for S6 {
    async fn start(&self) -> Result<(), ControllerError> {
        info!(service = %self.service_dir.display(), "starting haproxy through s6");
        self.svc("-u").await
    }

    async fn stop(&self) -> Result<(), ControllerError> {
        self.svc("-d").await
    }

    /// SIGUSR2 makes the master re-exec its workers.
    async fn reload(&self) -> Result<(), ControllerError> {
        save_server_state(self.runtime.as_ref(), &self.state_file).await;
        self.svc("-2").await?;
        info!("haproxy reloaded");
        Ok(())
    }

    async fn restart(&self) -> Result<(), ControllerError> {
        save_server_state(self.runtime.as_ref(), &self.state_file).await;
        self.svc("-r").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;
    use haproxy_client::MockRuntimeClient;

    fn s6(runner: Arc<RecordingRunner>, runtime: Arc<MockRuntimeClient>, state_dir: &std::path::Path) -> S6 {
        let mut config = ControllerConfig::from_lookup(|_| None).unwrap();
        config.state_dir = state_dir.to_path_buf();
        S6::new(&config, runtime, runner)
    }

    #[tokio::test]
    async fn test_reload_saves_state_first() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let runtime = Arc::new(MockRuntimeClient::new());
        runtime.set_servers_state("1\n");
        let s6 = s6(runner.clone(), runtime.clone(), dir.path());

        s6.reload().await.unwrap();
        assert_eq!(runtime.commands(), vec!["show servers state"]);
        assert_eq!(runner.calls(), vec!["s6-svc -2 /run/service/haproxy"]);
        assert_eq!(std::fs::read_to_string(dir.path().join("global")).unwrap(), "1\n");
    }

    #[tokio::test]
    async fn test_start_stop_restart() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let s6 = s6(runner.clone(), Arc::new(MockRuntimeClient::new()), dir.path());
        s6.start().await.unwrap();
        s6.restart().await.unwrap();
        s6.stop().await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "s6-svc -u /run/service/haproxy",
                "s6-svc -r /run/service/haproxy",
                "s6-svc -d /run/service/haproxy",
            ]
        );
    }
}
