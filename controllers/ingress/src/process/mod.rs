//! HAProxy process supervision
//!
//! Three supervisors share the [`Process`] interface: `direct` runs HAProxy
//! as a child in master-worker mode, `pebble` and `s6` delegate to an init
//! system that already owns the service.

pub mod direct;
pub mod pebble;
pub mod s6;

use crate::config::{ControllerConfig, SupervisorKind};
use crate::error::ControllerError;
use haproxy_client::{write_atomic, RuntimeClientTrait};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lifecycle of the HAProxy process.
#[async_trait::async_trait]
pub trait Process: Send + Sync {
    async fn start(&self) -> Result<(), ControllerError>;
    async fn stop(&self) -> Result<(), ControllerError>;
    /// Hot reload. Starts HAProxy when it is not running.
    async fn reload(&self) -> Result<(), ControllerError>;
    async fn restart(&self) -> Result<(), ControllerError>;
}

/// Output of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Runs external commands, swapped out in tests.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ControllerError>;
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealCommandRunner;

#[async_trait::async_trait]
impl CommandRunner for RealCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ControllerError> {
        debug!(program, ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| ControllerError::Process(format!("failed to execute {program}: {e}")))?;
        Ok(CommandOutput::from(output))
    }
}

/// Runs a command and fails on a non-zero exit.
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<String, ControllerError> {
    let output = runner.run(program, args).await?;
    if !output.success {
        return Err(ControllerError::Process(format!(
            "{program} {} failed: {}",
            args.join(" "),
            output.stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// Persists `show servers state` so the next HAProxy start restores server
/// states. A failure is logged only; HAProxy starts without the file.
pub async fn save_server_state(runtime: &dyn RuntimeClientTrait, path: &Path) {
    match runtime.show_servers_state().await {
        Ok(state) => match write_atomic(path, state.as_bytes()).await {
            Ok(()) => debug!(path = %path.display(), "server state saved"),
            Err(e) => warn!("failed to write server state: {}", e),
        },
        Err(e) => warn!("failed to read server state: {}", e),
    }
}

/// Builds the supervisor selected by the configuration.
pub fn new(
    config: &ControllerConfig,
    runtime: Arc<dyn RuntimeClientTrait>,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn Process> {
    info!(supervisor = ?config.process_supervisor, "using process supervisor");
    match config.process_supervisor {
        SupervisorKind::Direct => Arc::new(direct::Direct::new(config, runtime, runner)),
        SupervisorKind::Pebble => Arc::new(pebble::Pebble::new(runner)),
        SupervisorKind::S6 => Arc::new(s6::S6::new(config, runtime, runner)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records commands instead of running them.
    #[derive(Debug, Default)]
    pub struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        fail: Mutex<Option<String>>,
    }

    impl RecordingRunner {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn fail_on(&self, prefix: &str) {
            *self.fail.lock().unwrap() = Some(prefix.to_string());
        }
    }

    #[async_trait::async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ControllerError> {
            let call = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            let failed = self
                .fail
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|prefix| call.starts_with(prefix.as_str()));
            self.calls.lock().unwrap().push(call);
            Ok(CommandOutput {
                success: !failed,
                stdout: String::new(),
                stderr: if failed { "boom".to_string() } else { String::new() },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;
    use haproxy_client::MockRuntimeClient;

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let runner = RecordingRunner::default();
        runner.fail_on("pebble");
        let err = run_checked(&runner, "pebble", &["start".to_string(), "haproxy".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Process error: pebble start haproxy failed: boom");
    }

    #[tokio::test]
    async fn test_save_server_state_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global");
        let runtime = MockRuntimeClient::new();
        runtime.set_servers_state("1\n# be_id be_name srv_id\n");
        save_server_state(&runtime, &path).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n# be_id be_name srv_id\n");
    }

    #[tokio::test]
    async fn test_save_server_state_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global");
        let runtime = MockRuntimeClient::new();
        runtime.fail_on("show servers state");
        save_server_state(&runtime, &path).await;
        assert!(!path.exists());
    }
}
