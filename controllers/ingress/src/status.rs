//! Gateway API status updates
//!
//! The reconciler hands a snapshot of the desired Gateway and TCPRoute
//! statuses to a separate task after each sync. The task patches only what
//! changed since the previous snapshot, so the sync loop never waits on the
//! API server.

use crate::error::ControllerError;
use chrono::{SecondsFormat, Utc};
use crds::{Condition, Gateway, GatewayStatus, TCPRoute, TCPRouteStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshots waiting for the status task. Older snapshots are dropped when
/// the task falls behind.
pub const STATUS_CHANNEL_CAPACITY: usize = 4;

/// Status of one Gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStatusUpdate {
    pub namespace: String,
    pub name: String,
    pub status: GatewayStatus,
}

/// Status of one TCPRoute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStatusUpdate {
    pub namespace: String,
    pub name: String,
    pub status: TCPRouteStatus,
}

/// Desired statuses after one sync. Condition timestamps are left empty and
/// filled in when patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub gateways: Vec<GatewayStatusUpdate>,
    pub routes: Vec<RouteStatusUpdate>,
}

impl StatusSnapshot {
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty() && self.routes.is_empty()
    }
}

/// Condition without a transition time.
pub fn condition(kind: &str, ok: bool, reason: &str, message: impl Into<String>, generation: Option<i64>) -> Condition {
    Condition {
        r#type: kind.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        last_transition_time: String::new(),
        observed_generation: generation,
    }
}

/// Writes status subresources.
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    async fn patch_gateway(&self, namespace: &str, name: &str, status: &GatewayStatus) -> Result<(), ControllerError>;
    async fn patch_tcp_route(&self, namespace: &str, name: &str, status: &TCPRouteStatus) -> Result<(), ControllerError>;
}

/// Merge patches against the API server.
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Writer patching the status subresources through `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_gateway(&self, namespace: &str, name: &str, status: &GatewayStatus) -> Result<(), ControllerError> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_tcp_route(&self, namespace: &str, name: &str, status: &TCPRouteStatus) -> Result<(), ControllerError> {
        let api: Api<TCPRoute> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

fn stamp(conditions: &mut [Condition], now: &str) {
    for condition in conditions.iter_mut().filter(|c| c.last_transition_time.is_empty()) {
        condition.last_transition_time = now.to_string();
    }
}

type Key = (String, String);

/// Applies snapshots, remembering what was last written per object.
pub struct StatusManager {
    writer: Arc<dyn StatusWriter>,
    gateways: HashMap<Key, GatewayStatus>,
    routes: HashMap<Key, TCPRouteStatus>,
}

impl StatusManager {
    /// Manager publishing through `writer`.
    pub fn new(writer: Arc<dyn StatusWriter>) -> Self {
        Self {
            writer,
            gateways: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Patches the objects whose status differs from the last write.
    /// Returns the number of patches sent.
    pub async fn apply(&mut self, snapshot: StatusSnapshot) -> usize {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut patched = 0;

        for update in snapshot.gateways {
            let key = (update.namespace.clone(), update.name.clone());
            if self.gateways.get(&key) == Some(&update.status) {
                continue;
            }
            let mut status = update.status.clone();
            stamp(&mut status.conditions, &now);
            for listener in &mut status.listeners {
                stamp(&mut listener.conditions, &now);
            }
            match self.writer.patch_gateway(&update.namespace, &update.name, &status).await {
                Ok(()) => {
                    debug!(gateway = %format!("{}/{}", key.0, key.1), "gateway status updated");
                    self.gateways.insert(key, update.status);
                    patched += 1;
                }
                Err(e) => warn!(gateway = %format!("{}/{}", key.0, key.1), "failed to update status: {}", e),
            }
        }

        for update in snapshot.routes {
            let key = (update.namespace.clone(), update.name.clone());
            if self.routes.get(&key) == Some(&update.status) {
                continue;
            }
            let mut status = update.status.clone();
            for parent in &mut status.parents {
                stamp(&mut parent.conditions, &now);
            }
            match self.writer.patch_tcp_route(&update.namespace, &update.name, &status).await {
                Ok(()) => {
                    debug!(route = %format!("{}/{}", key.0, key.1), "tcproute status updated");
                    self.routes.insert(key, update.status);
                    patched += 1;
                }
                Err(e) => warn!(route = %format!("{}/{}", key.0, key.1), "failed to update status: {}", e),
            }
        }
        patched
    }

    /// Consumes snapshots until cancelled.
    pub async fn run(mut self, mut rx: mpsc::Receiver<StatusSnapshot>, cancel: CancellationToken) {
        info!("status manager started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                snapshot = rx.recv() => match snapshot {
                    Some(snapshot) => {
                        self.apply(snapshot).await;
                    }
                    None => break,
                },
            }
        }
        info!("status manager stopped");
    }
}
