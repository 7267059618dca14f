//! HAProxy managed as a Pebble service.

use super::{run_checked, CommandRunner, Process};
use crate::error::ControllerError;
use std::sync::Arc;
use tracing::info;

const PEBBLE: &str = "pebble";
const SERVICE: &str = "haproxy";

/// Drives the `haproxy` Pebble service. Pebble owns the process and its
/// server state, so nothing is saved before reloads.
pub struct Pebble {
    runner: Arc<dyn CommandRunner>,
}

impl Pebble {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn pebble(&self, args: &[&str]) -> Result<(), ControllerError> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        run_checked(self.runner.as_ref(), PEBBLE, &args).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl Process for Pebble {
    async fn start(&self) -> Result<(), ControllerError> {
        info!("starting haproxy through pebble");
        self.pebble(&["start", SERVICE]).await
    }

    async fn stop(&self) -> Result<(), ControllerError> {
        self.pebble(&["stop", SERVICE]).await
    }

    async fn reload(&self) -> Result<(), ControllerError> {
        self.pebble(&["signal", "SIGUSR2", SERVICE]).await?;
        info!("haproxy reloaded");
        Ok(())
    }

    async fn restart(&self) -> Result<(), ControllerError> {
        self.pebble(&["restart", SERVICE]).await
    }
}
