//! Kubernetes resource watchers.
//!
//! One task per watched type converts watch events into canonical
//! [`SyncDataEvent`]s and publishes them on the reconciler's event channel.
//! The watchers never touch the store. Updates whose (type, uid,
//! resource version) the reconciler already processed are dropped here.

pub mod convert;

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::store::events::{SyncDataEvent, SyncType};
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Namespace, Pod, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::{Api, Client, Resource};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Last processed resource version per (type, uid).
#[derive(Debug, Default)]
pub struct ProcessedVersions {
    inner: RwLock<HashMap<SyncType, HashMap<String, String>>>,
}

fn version_key(event: &SyncDataEvent) -> String {
    if event.uid.is_empty() {
        format!("{}/{}", event.namespace, event.name)
    } else {
        event.uid.clone()
    }
}

impl ProcessedVersions {
    /// Empty version table.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when this exact version was already applied.
    pub fn is_processed(&self, event: &SyncDataEvent) -> bool {
        if event.resource_version.is_empty() {
            return false;
        }
        let Ok(inner) = self.inner.read() else {
            return false;
        };
        inner
            .get(&event.sync_type)
            .and_then(|versions| versions.get(&version_key(event)))
            .is_some_and(|rv| *rv == event.resource_version)
    }

    /// Records an applied event. Deletions forget the object.
    pub fn mark_processed(&self, event: &SyncDataEvent) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        let versions = inner.entry(event.sync_type).or_default();
        if event.deleted {
            versions.remove(&version_key(event));
        } else {
            versions.insert(version_key(event), event.resource_version.clone());
        }
    }
}

/// Publishes events for every watched resource type.
#[derive(Clone)]
pub struct Watcher {
    client: Client,
    tx: mpsc::Sender<SyncDataEvent>,
    processed: Arc<ProcessedVersions>,
    resync: Duration,
    cancel: CancellationToken,
}

impl Watcher {
    /// Watcher publishing to `tx` and resyncing every `resync`.
    pub fn new(
        client: Client,
        tx: mpsc::Sender<SyncDataEvent>,
        processed: Arc<ProcessedVersions>,
        resync: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            tx,
            processed,
            resync,
            cancel,
        }
    }

    /// Spawns one watch task per resource type enabled by `config`.
    pub async fn spawn_all(&self, config: &ControllerConfig, tasks: &mut JoinSet<Result<(), ControllerError>>) {
        use crds::{backend, defaults, global, tcp};
        use convert::cr;

        macro_rules! spawn_watch {
            ($label:expr, $kind:ty, $convert:expr) => {{
                let w = self.clone();
                tasks.spawn(async move {
                    let api = Api::<$kind>::all(w.client.clone());
                    w.watch($label, api, $convert).await
                });
            }};
        }

        spawn_watch!("Namespace", Namespace, convert::namespace);
        spawn_watch!("Ingress", Ingress, convert::ingress);
        spawn_watch!("IngressClass", IngressClass, convert::ingress_class);
        spawn_watch!("Service", Service, convert::service);
        spawn_watch!("Secret", Secret, convert::secret);
        spawn_watch!("ConfigMap", ConfigMap, convert::configmap);

        if self.client.list_api_group_resources("discovery.k8s.io/v1").await.is_ok() {
            spawn_watch!("EndpointSlice", EndpointSlice, convert::endpoint_slice);
        } else {
            warn!("discovery.k8s.io/v1 unavailable, watching legacy Endpoints");
            spawn_watch!("Endpoints", Endpoints, convert::endpoints);
        }

        let prefix = convert::pod_prefix(&config.pod_name);
        let pods = Api::<Pod>::namespaced(self.client.clone(), &config.pod_namespace);
        let w = self.clone();
        tasks.spawn(async move { w.watch("Pod", pods, move |pod| convert::pod(pod, &prefix)).await });

        if config.gateway_api {
            spawn_watch!("GatewayClass", crds::GatewayClass, convert::gateway_class);
            spawn_watch!("Gateway", crds::Gateway, convert::gateway);
            spawn_watch!("TCPRoute", crds::TCPRoute, convert::tcp_route);
            spawn_watch!("ReferenceGrant", crds::ReferenceGrant, convert::reference_grant);
        }

        if config.custom_resources {
            spawn_watch!("Global.v1", global::v1::Global, cr::global_v1);
            spawn_watch!("Global.v3", global::v3::Global, cr::global_v3);
            spawn_watch!("Defaults.v1", defaults::v1::Defaults, cr::defaults_v1);
            spawn_watch!("Defaults.v3", defaults::v3::Defaults, cr::defaults_v3);
            spawn_watch!("Backend.v1", backend::v1::Backend, cr::backend_v1);
            spawn_watch!("Backend.v3", backend::v3::Backend, cr::backend_v3);
            spawn_watch!("TCP.v1", tcp::v1::TCP, cr::tcp_v1);
            spawn_watch!("TCP.v3", tcp::v3::TCP, cr::tcp_v3);
            spawn_watch!("Frontend.v3", crds::Frontend, cr::frontend);
        }
    }

    /// Watches one resource type until cancellation. The watch is recreated
    /// every resync period so all objects get re-listed.
    async fn watch<K, F>(&self, label: &'static str, api: Api<K>, convert: F) -> Result<(), ControllerError>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        K::DynamicType: Default,
        F: Fn(&K) -> Option<SyncDataEvent> + Send + Sync,
    {
        info!("Starting {} watcher", label);
        let mut backoff = FibonacciBackoff::default();

        loop {
            let mut stream = Box::pin(watcher(api.clone(), watcher::Config::default()));
            let resync = tokio::time::sleep(self.resync);
            tokio::pin!(resync);

            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        debug!("{} watcher stopped", label);
                        return Ok(());
                    }
                    () = &mut resync => {
                        debug!("{} watcher resync", label);
                        break;
                    }
                    next = stream.try_next() => match next {
                        Ok(Some(event)) => {
                            backoff.reset();
                            self.handle(label, event, &convert).await?;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let delay = backoff.next_backoff();
                            warn!("{} watcher stream error: {}, retrying in {:?}", label, e, delay);
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle<K, F>(&self, label: &str, event: watcher::Event<K>, convert: &F) -> Result<(), ControllerError>
    where
        F: Fn(&K) -> Option<SyncDataEvent>,
    {
        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                if let Some(ev) = convert(&obj) {
                    self.publish(ev).await?;
                }
            }
            watcher::Event::Delete(obj) => {
                if let Some(ev) = convert(&obj) {
                    self.publish(ev.deleted()).await?;
                }
            }
            watcher::Event::Init => {
                debug!("{} watcher initialized", label);
            }
            watcher::Event::InitDone => {
                debug!("{} watcher initialization complete", label);
            }
        }
        Ok(())
    }

    async fn publish(&self, event: SyncDataEvent) -> Result<(), ControllerError> {
        publish(&self.tx, &self.processed, event).await
    }
}

/// Sends `event` unless it is an update already processed.
pub async fn publish(
    tx: &mpsc::Sender<SyncDataEvent>,
    processed: &ProcessedVersions,
    event: SyncDataEvent,
) -> Result<(), ControllerError> {
    if !event.deleted && processed.is_processed(&event) {
        trace!(kind = %event.sync_type, namespace = %event.namespace, name = %event.name, "already processed, dropped");
        return Ok(());
    }
    tx.send(event)
        .await
        .map_err(|e| ControllerError::Watch(format!("event channel closed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::events::EventData;

    fn event(rv: &str) -> SyncDataEvent {
        SyncDataEvent::new("ns", "app", EventData::Pod("app".to_string())).with_version("uid-1", rv)
    }

    #[tokio::test]
    async fn test_same_version_published_once() {
        let (tx, mut rx) = mpsc::channel(8);
        let processed = ProcessedVersions::new();

        publish(&tx, &processed, event("1")).await.unwrap();
        let received = rx.recv().await.unwrap();
        processed.mark_processed(&received);

        publish(&tx, &processed, event("1")).await.unwrap();
        publish(&tx, &processed, event("2")).await.unwrap();
        drop(tx);

        let next = rx.recv().await.unwrap();
        assert_eq!(next.resource_version, "2");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_never_dropped() {
        let (tx, mut rx) = mpsc::channel(8);
        let processed = ProcessedVersions::new();
        processed.mark_processed(&event("1"));

        publish(&tx, &processed, event("1").deleted()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert!(received.deleted);

        processed.mark_processed(&received);
        assert!(!processed.is_processed(&event("1")));
    }

    #[test]
    fn test_key_falls_back_to_namespace_name() {
        let processed = ProcessedVersions::new();
        let a = SyncDataEvent::new("ns-a", "app", EventData::Pod("app".to_string())).with_version("", "1");
        let b = SyncDataEvent::new("ns-b", "app", EventData::Pod("app".to_string())).with_version("", "1");
        processed.mark_processed(&a);
        assert!(processed.is_processed(&a));
        assert!(!processed.is_processed(&b));
    }

    #[test]
    fn test_types_are_tracked_separately() {
        let processed = ProcessedVersions::new();
        let pod = event("1");
        let mut other = event("1");
        other.sync_type = SyncType::Service;
        processed.mark_processed(&pod);
        assert!(!processed.is_processed(&other));
    }
}
