//! Main controller implementation.
//!
//! Wires the watchers, the reconciler, the HAProxy process and the
//! controller endpoint together and runs them until shutdown.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::haproxy::HAProxy;
use crate::process::{self, Process, RealCommandRunner};
use crate::reconciler::Reconciler;
use crate::server;
use crate::status::{KubeStatusWriter, StatusManager, STATUS_CHANNEL_CAPACITY};
use crate::store::events::EVENT_CHANNEL_CAPACITY;
use crate::watcher::{ProcessedVersions, Watcher};
use haproxy_client::RuntimeClient;
use kube::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Ingress controller tasks.
pub struct Controller {
    config: Arc<ControllerConfig>,
    process: Arc<dyn Process>,
    cancel: CancellationToken,
    watchers: JoinSet<Result<(), ControllerError>>,
    reconciler: JoinHandle<()>,
    status: Option<JoinHandle<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing HAProxy Ingress Controller");
        let config = Arc::new(config);
        let cancel = CancellationToken::new();

        let kube_client = Client::try_default().await?;

        let runtime = Arc::new(RuntimeClient::new(config.runtime_socket()));
        let process = process::new(&config, runtime.clone(), Arc::new(RealCommandRunner));
        let mut haproxy = HAProxy::new(&config, runtime, process.clone());
        haproxy.init().await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let processed = Arc::new(ProcessedVersions::new());

        let mut reconciler = Reconciler::new(config.clone(), haproxy, rx, processed.clone());
        let status = if config.gateway_api {
            let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
            reconciler = reconciler.with_status(status_tx);
            let manager = StatusManager::new(Arc::new(KubeStatusWriter::new(kube_client.clone())));
            Some(tokio::spawn(manager.run(status_rx, cancel.clone())))
        } else {
            None
        };

        let watcher = Watcher::new(kube_client, tx, processed, config.cache_resync_period, cancel.clone());
        let mut watchers = JoinSet::new();
        watcher.spawn_all(&config, &mut watchers).await;

        let reconciler = tokio::spawn(reconciler.run(cancel.clone()));
        let server = tokio::spawn(server::serve(config.controller_port, config.prometheus, cancel.clone()));

        Ok(Self {
            config,
            process,
            cancel,
            watchers,
            reconciler,
            status,
            server,
        })
    }

    /// Runs the controller until a shutdown signal or a fatal task failure,
    /// then stops HAProxy.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!(
            ingress_class = %self.config.ingress_class,
            gateway_api = self.config.gateway_api,
            "HAProxy Ingress Controller running"
        );

        let mut reconciler_done = false;
        let mut server_done = false;
        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("shutdown signal received"),
                    Err(e) => warn!("failed to listen for shutdown signal: {}", e),
                }
                Ok(())
            }
            Some(joined) = self.watchers.join_next() => match joined {
                Ok(Ok(())) => Err(ControllerError::Watch("watcher exited".to_string())),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ControllerError::Watch(format!("watcher panicked: {e}"))),
            },
            joined = &mut self.reconciler => {
                reconciler_done = true;
                Err(ControllerError::Process(format!("reconciler exited: {joined:?}")))
            }
            joined = &mut self.server => {
                server_done = true;
                match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(ControllerError::Io(e)),
                    Err(e) => Err(ControllerError::Process(format!("controller endpoint panicked: {e}"))),
                }
            }
        };

        self.shutdown(reconciler_done, server_done).await;
        result
    }

    /// Cancels every task and waits for those still running.
    async fn shutdown(mut self, reconciler_done: bool, server_done: bool) {
        self.cancel.cancel();
        while self.watchers.join_next().await.is_some() {}
        if !reconciler_done && let Err(e) = self.reconciler.await {
            warn!("reconciler task failed: {}", e);
        }
        if !server_done && let Err(e) = self.server.await {
            warn!("controller endpoint task failed: {}", e);
        }
        if let Some(status) = self.status.take()
            && let Err(e) = status.await
        {
            warn!("status task failed: {}", e);
        }
        if let Err(e) = self.process.stop().await {
            error!("failed to stop HAProxy: {}", e);
        }
        info!("HAProxy Ingress Controller stopped");
    }
}
