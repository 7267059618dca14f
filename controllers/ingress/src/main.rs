//! HAProxy Ingress Controller
//!
//! Watches Ingress, Gateway API and HAProxy custom resources and keeps an
//! HAProxy instance configured to match them, using the runtime API where a
//! change allows it and a hot reload otherwise.

mod annotations;
mod backoff;
mod config;
mod controller;
mod error;
mod fs_writer;
mod haproxy;
mod logging;
mod maps;
mod metrics;
mod process;
mod reconciler;
mod router;
mod rules;
mod server;
mod status;
mod store;
#[cfg(test)]
mod test_utils;
mod utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let config = ControllerConfig::from_env()?;
    logging::init(config.log_level);

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("a TLS crypto provider was already installed");
    }

    info!("Starting HAProxy Ingress Controller");
    info!("Configuration:");
    info!("  ConfigMap: {}", config.configmap);
    info!("  Ingress class: {}", config.ingress_class);
    info!("  Binds: http {} https {}", config.http_bind_port, config.https_bind_port);
    info!("  Supervisor: {:?}", config.process_supervisor);
    info!("  Gateway API: {}", config.gateway_api);

    if config.prometheus {
        metrics::init().map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {e}")))?;
    }

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
