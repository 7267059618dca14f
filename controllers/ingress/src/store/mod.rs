//! In-memory Kubernetes store
//!
//! Owned by the reconciler task. Events are applied between syncs; every
//! object carries a [`Status`] describing how it changed since the last
//! sync, and [`K8sStore::clean`] resets the statuses once a sync completed.

pub mod events;
pub mod types;

use crds::backend::v3::BackendSpec;
use crds::defaults::v3::DefaultsSpec;
use crds::global::v3::GlobalSpec;
use crds::tcp::v3::TCPSpec;
use crds::FrontendSpec;
use events::{EventData, SyncDataEvent};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};
pub use types::*;

/// Namespace whitelist / blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

impl NamespaceFilter {
    /// The whitelist wins when both lists are set.
    pub fn relevant(&self, namespace: &str) -> bool {
        if !self.whitelist.is_empty() {
            return self.whitelist.iter().any(|ns| ns == namespace);
        }
        !self.blacklist.iter().any(|ns| ns == namespace)
    }
}

/// Resources of one namespace.
#[derive(Debug, Default)]
pub struct Namespace {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Ingress and route resources of the namespace are served
    pub relevant: bool,
    pub status: Status,
    pub ingresses: BTreeMap<String, Tracked<Ingress>>,
    pub services: BTreeMap<String, Tracked<Service>>,
    /// Service name, then slice name
    pub endpoints: BTreeMap<String, BTreeMap<String, Tracked<Endpoints>>>,
    pub secrets: BTreeMap<String, Tracked<Secret>>,
    pub configmaps: BTreeMap<String, Tracked<ConfigMap>>,
    pub gateways: BTreeMap<String, Tracked<Gateway>>,
    pub tcp_routes: BTreeMap<String, Tracked<TcpRoute>>,
    pub reference_grants: BTreeMap<String, Tracked<ReferenceGrant>>,
    pub cr_globals: BTreeMap<String, Tracked<CustomResource<GlobalSpec>>>,
    pub cr_defaults: BTreeMap<String, Tracked<CustomResource<DefaultsSpec>>>,
    pub cr_backends: BTreeMap<String, Tracked<CustomResource<BackendSpec>>>,
    pub cr_tcps: BTreeMap<String, Tracked<CustomResource<TCPSpec>>>,
    pub cr_frontends: BTreeMap<String, Tracked<CustomResource<FrontendSpec>>>,
}

fn upsert<T: PartialEq>(map: &mut BTreeMap<String, Tracked<T>>, name: &str, data: T) -> bool {
    match map.get_mut(name) {
        Some(existing) if existing.data == data && !existing.is_deleted() => false,
        Some(existing) => {
            existing.data = data;
            if existing.status != Status::Added {
                existing.status = Status::Modified;
            }
            true
        }
        None => {
            map.insert(name.to_string(), Tracked::added(data));
            true
        }
    }
}

fn mark_deleted<T>(map: &mut BTreeMap<String, Tracked<T>>, name: &str) -> bool {
    match map.get_mut(name) {
        Some(existing) if !existing.is_deleted() => {
            existing.status = Status::Deleted;
            true
        }
        _ => false,
    }
}

fn mark_all_deleted<T>(map: &mut BTreeMap<String, Tracked<T>>) {
    for item in map.values_mut() {
        item.status = Status::Deleted;
    }
}

fn clean_map<T>(map: &mut BTreeMap<String, Tracked<T>>) {
    map.retain(|_, item| !item.is_deleted());
    for item in map.values_mut() {
        item.status = Status::Empty;
    }
}

impl Namespace {
    fn new(name: &str, relevant: bool) -> Self {
        Self {
            name: name.to_string(),
            relevant,
            status: Status::Added,
            ..Default::default()
        }
    }

    /// Endpoints of a service merged across its slices, keyed by port name.
    pub fn service_endpoints(&self, service: &str) -> BTreeMap<String, PortEndpoints> {
        let mut merged: BTreeMap<String, PortEndpoints> = BTreeMap::new();
        let Some(slices) = self.endpoints.get(service) else {
            return merged;
        };
        for slice in slices.values().filter(|s| !s.is_deleted()) {
            for (port_name, endpoints) in &slice.data.ports {
                let entry = merged.entry(port_name.clone()).or_insert_with(|| PortEndpoints {
                    port: endpoints.port,
                    addresses: BTreeSet::new(),
                });
                entry.port = endpoints.port;
                entry.addresses.extend(endpoints.addresses.iter().cloned());
            }
        }
        merged
    }

    /// Live (not deleted) ingresses.
    pub fn live_ingresses(&self) -> impl Iterator<Item = &Ingress> {
        self.ingresses.values().filter(|i| !i.is_deleted()).map(|i| &i.data)
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name).filter(|s| !s.is_deleted()).map(|s| &s.data)
    }

    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets.get(name).filter(|s| !s.is_deleted()).map(|s| &s.data)
    }

    pub fn configmap(&self, name: &str) -> Option<&ConfigMap> {
        self.configmaps.get(name).filter(|c| !c.is_deleted()).map(|c| &c.data)
    }

    /// True when a service or any of its endpoint slices changed.
    pub fn service_changed(&self, name: &str) -> bool {
        self.services.get(name).is_some_and(Tracked::is_changed)
            || self
                .endpoints
                .get(name)
                .is_some_and(|slices| slices.values().any(Tracked::is_changed))
    }

    fn mark_everything_deleted(&mut self) {
        self.status = Status::Deleted;
        mark_all_deleted(&mut self.ingresses);
        mark_all_deleted(&mut self.services);
        for slices in self.endpoints.values_mut() {
            mark_all_deleted(slices);
        }
        mark_all_deleted(&mut self.secrets);
        mark_all_deleted(&mut self.configmaps);
        mark_all_deleted(&mut self.gateways);
        mark_all_deleted(&mut self.tcp_routes);
        mark_all_deleted(&mut self.reference_grants);
        mark_all_deleted(&mut self.cr_globals);
        mark_all_deleted(&mut self.cr_defaults);
        mark_all_deleted(&mut self.cr_backends);
        mark_all_deleted(&mut self.cr_tcps);
        mark_all_deleted(&mut self.cr_frontends);
    }

    fn clean(&mut self) {
        self.status = Status::Empty;
        clean_map(&mut self.ingresses);
        clean_map(&mut self.services);
        for slices in self.endpoints.values_mut() {
            clean_map(slices);
        }
        self.endpoints.retain(|_, slices| !slices.is_empty());
        clean_map(&mut self.secrets);
        clean_map(&mut self.configmaps);
        clean_map(&mut self.gateways);
        clean_map(&mut self.tcp_routes);
        clean_map(&mut self.reference_grants);
        clean_map(&mut self.cr_globals);
        clean_map(&mut self.cr_defaults);
        clean_map(&mut self.cr_backends);
        clean_map(&mut self.cr_tcps);
        clean_map(&mut self.cr_frontends);
    }
}

/// Cluster state as seen by the controller.
#[derive(Debug, Default)]
pub struct K8sStore {
    filter: NamespaceFilter,
    pub namespaces: BTreeMap<String, Namespace>,
    pub ingress_classes: BTreeMap<String, Tracked<IngressClass>>,
    pub gateway_classes: BTreeMap<String, Tracked<GatewayClass>>,
    /// Running replicas of the controller
    pub pods: BTreeSet<String>,
    pods_changed: bool,
}

impl K8sStore {
    /// Empty store applying `filter`.
    pub fn new(filter: NamespaceFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Namespace `name` unless it was deleted.
    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name).filter(|ns| ns.status != Status::Deleted)
    }

    fn namespace_mut(&mut self, name: &str) -> &mut Namespace {
        let relevant = self.filter.relevant(name);
        let ns = self
            .namespaces
            .entry(name.to_string())
            .or_insert_with(|| Namespace::new(name, relevant));
        if ns.status == Status::Deleted {
            ns.status = Status::Modified;
        }
        ns
    }

    /// Number of controller replicas, at least one.
    pub fn replicas(&self) -> usize {
        self.pods.len().max(1)
    }

    /// True when the replica set changed since the last sync.
    pub fn pods_changed(&self) -> bool {
        self.pods_changed
    }

    /// Applies one event. Returns true when the store changed.
    pub fn event_process(&mut self, event: &SyncDataEvent) -> bool {
        let changed = if event.deleted {
            self.delete(event)
        } else {
            self.apply(event)
        };
        if changed {
            debug!(
                kind = %event.sync_type,
                namespace = %event.namespace,
                name = %event.name,
                deleted = event.deleted,
                "store updated"
            );
        } else {
            trace!(kind = %event.sync_type, namespace = %event.namespace, name = %event.name, "no change");
        }
        changed
    }

    fn apply(&mut self, event: &SyncDataEvent) -> bool {
        let name = event.name.as_str();
        match &event.data {
            EventData::Namespace(info) => {
                let ns = self.namespace_mut(&info.name);
                if ns.labels == info.labels {
                    return false;
                }
                ns.labels.clone_from(&info.labels);
                if ns.status == Status::Empty {
                    ns.status = Status::Modified;
                }
                true
            }
            EventData::IngressClass(class) => upsert(&mut self.ingress_classes, name, class.clone()),
            EventData::GatewayClass(class) => upsert(&mut self.gateway_classes, name, class.clone()),
            EventData::Pod(pod) => {
                let inserted = self.pods.insert(pod.clone());
                self.pods_changed |= inserted;
                inserted
            }
            EventData::Ingress(ingress) => {
                upsert(&mut self.namespace_mut(&event.namespace).ingresses, name, ingress.clone())
            }
            EventData::Service(service) => {
                upsert(&mut self.namespace_mut(&event.namespace).services, name, service.clone())
            }
            EventData::Endpoints(endpoints) => {
                let ns = self.namespace_mut(&event.namespace);
                let slices = ns.endpoints.entry(endpoints.service.clone()).or_default();
                upsert(slices, &endpoints.slice_name, endpoints.clone())
            }
            EventData::Secret(secret) => {
                upsert(&mut self.namespace_mut(&event.namespace).secrets, name, secret.clone())
            }
            EventData::ConfigMap(configmap) => {
                upsert(&mut self.namespace_mut(&event.namespace).configmaps, name, configmap.clone())
            }
            EventData::Gateway(gateway) => {
                upsert(&mut self.namespace_mut(&event.namespace).gateways, name, gateway.clone())
            }
            EventData::TcpRoute(route) => {
                upsert(&mut self.namespace_mut(&event.namespace).tcp_routes, name, route.clone())
            }
            EventData::ReferenceGrant(grant) => {
                upsert(&mut self.namespace_mut(&event.namespace).reference_grants, name, grant.clone())
            }
            EventData::Global(cr) => upsert(&mut self.namespace_mut(&event.namespace).cr_globals, name, cr.clone()),
            EventData::Defaults(cr) => {
                upsert(&mut self.namespace_mut(&event.namespace).cr_defaults, name, cr.clone())
            }
            EventData::Backend(cr) => {
                upsert(&mut self.namespace_mut(&event.namespace).cr_backends, name, cr.clone())
            }
            EventData::Tcp(cr) => upsert(&mut self.namespace_mut(&event.namespace).cr_tcps, name, cr.clone()),
            EventData::Frontend(cr) => {
                upsert(&mut self.namespace_mut(&event.namespace).cr_frontends, name, cr.clone())
            }
        }
    }

    fn delete(&mut self, event: &SyncDataEvent) -> bool {
        let name = event.name.as_str();
        match &event.data {
            EventData::Namespace(info) => match self.namespaces.get_mut(&info.name) {
                Some(ns) if ns.status != Status::Deleted => {
                    ns.mark_everything_deleted();
                    true
                }
                _ => false,
            },
            EventData::IngressClass(_) => mark_deleted(&mut self.ingress_classes, name),
            EventData::GatewayClass(_) => mark_deleted(&mut self.gateway_classes, name),
            EventData::Pod(pod) => {
                let removed = self.pods.remove(pod);
                self.pods_changed |= removed;
                removed
            }
            data => {
                let Some(ns) = self.namespaces.get_mut(&event.namespace) else {
                    return false;
                };
                match data {
                    EventData::Ingress(_) => mark_deleted(&mut ns.ingresses, name),
                    EventData::Service(_) => mark_deleted(&mut ns.services, name),
                    EventData::Endpoints(endpoints) => ns
                        .endpoints
                        .get_mut(&endpoints.service)
                        .is_some_and(|slices| mark_deleted(slices, &endpoints.slice_name)),
                    EventData::Secret(_) => mark_deleted(&mut ns.secrets, name),
                    EventData::ConfigMap(_) => mark_deleted(&mut ns.configmaps, name),
                    EventData::Gateway(_) => mark_deleted(&mut ns.gateways, name),
                    EventData::TcpRoute(_) => mark_deleted(&mut ns.tcp_routes, name),
                    EventData::ReferenceGrant(_) => mark_deleted(&mut ns.reference_grants, name),
                    EventData::Global(_) => mark_deleted(&mut ns.cr_globals, name),
                    EventData::Defaults(_) => mark_deleted(&mut ns.cr_defaults, name),
                    EventData::Backend(_) => mark_deleted(&mut ns.cr_backends, name),
                    EventData::Tcp(_) => mark_deleted(&mut ns.cr_tcps, name),
                    EventData::Frontend(_) => mark_deleted(&mut ns.cr_frontends, name),
                    EventData::Namespace(_)
                    | EventData::IngressClass(_)
                    | EventData::GatewayClass(_)
                    | EventData::Pod(_) => false,
                }
            }
        }
    }

    /// Drops deleted objects and marks every survivor `Empty`.
    pub fn clean(&mut self) {
        self.namespaces.retain(|_, ns| ns.status != Status::Deleted);
        for ns in self.namespaces.values_mut() {
            ns.clean();
        }
        clean_map(&mut self.ingress_classes);
        clean_map(&mut self.gateway_classes);
        self.pods_changed = false;
    }

    /// Live (not deleted) ingress classes.
    pub fn ingress_class(&self, name: &str) -> Option<&IngressClass> {
        self.ingress_classes.get(name).filter(|c| !c.is_deleted()).map(|c| &c.data)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<&Secret> {
        self.namespace(namespace).and_then(|ns| ns.secret(name))
    }

    pub fn configmap(&self, namespace: &str, name: &str) -> Option<&ConfigMap> {
        self.namespace(namespace).and_then(|ns| ns.configmap(name))
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&Service> {
        self.namespace(namespace).and_then(|ns| ns.service(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::events::SyncDataEvent;

    fn service_event(ns: &str, name: &str, port: i32) -> SyncDataEvent {
        SyncDataEvent::new(
            ns,
            name,
            EventData::Service(Service {
                namespace: ns.to_string(),
                name: name.to_string(),
                ports: vec![ServicePort {
                    name: "http".to_string(),
                    protocol: "TCP".to_string(),
                    port,
                }],
                ..Default::default()
            }),
        )
    }

    fn slice_event(ns: &str, service: &str, slice: &str, addresses: &[&str]) -> SyncDataEvent {
        let mut ports = BTreeMap::new();
        ports.insert(
            "http".to_string(),
            PortEndpoints {
                port: 8080,
                addresses: addresses.iter().map(ToString::to_string).collect(),
            },
        );
        SyncDataEvent::new(
            ns,
            slice,
            EventData::Endpoints(Endpoints {
                namespace: ns.to_string(),
                service: service.to_string(),
                slice_name: slice.to_string(),
                ports,
            }),
        )
    }

    #[test]
    fn test_status_transitions() {
        let mut store = K8sStore::default();
        assert!(store.event_process(&service_event("ns", "app", 80)));
        assert_eq!(store.namespaces["ns"].services["app"].status, Status::Added);

        // Equal update is a no-op
        assert!(!store.event_process(&service_event("ns", "app", 80)));

        store.clean();
        assert_eq!(store.namespaces["ns"].services["app"].status, Status::Empty);

        assert!(store.event_process(&service_event("ns", "app", 81)));
        assert_eq!(store.namespaces["ns"].services["app"].status, Status::Modified);

        assert!(store.event_process(&service_event("ns", "app", 81).deleted()));
        assert_eq!(store.namespaces["ns"].services["app"].status, Status::Deleted);
        assert!(store.service("ns", "app").is_none());

        store.clean();
        assert!(!store.namespaces["ns"].services.contains_key("app"));
    }

    #[test]
    fn test_endpoints_merge_across_slices() {
        let mut store = K8sStore::default();
        store.event_process(&slice_event("ns", "app", "app-abc", &["10.0.0.1", "10.0.0.2"]));
        store.event_process(&slice_event("ns", "app", "app-def", &["10.0.0.3"]));

        let merged = store.namespaces["ns"].service_endpoints("app");
        let addresses: Vec<_> = merged["http"].addresses.iter().cloned().collect();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

        store.event_process(&slice_event("ns", "app", "app-def", &[]).deleted());
        let merged = store.namespaces["ns"].service_endpoints("app");
        assert_eq!(merged["http"].addresses.len(), 2);
    }

    #[test]
    fn test_namespace_delete_cascades() {
        let mut store = K8sStore::default();
        store.event_process(&service_event("ns", "app", 80));
        store.event_process(&slice_event("ns", "app", "app-abc", &["10.0.0.1"]));
        store.clean();

        let ns_event = SyncDataEvent::new(
            "",
            "ns",
            EventData::Namespace(NamespaceInfo {
                name: "ns".to_string(),
                ..Default::default()
            }),
        )
        .deleted();
        assert!(store.event_process(&ns_event));
        let ns = &store.namespaces["ns"];
        assert!(ns.services["app"].is_deleted());
        assert!(ns.endpoints["app"]["app-abc"].is_deleted());
        assert!(store.namespace("ns").is_none());

        store.clean();
        assert!(store.namespaces.is_empty());
    }

    #[test]
    fn test_namespace_relevance_from_filter() {
        let mut store = K8sStore::new(NamespaceFilter {
            whitelist: vec!["apps".to_string()],
            blacklist: vec![],
        });
        store.event_process(&service_event("apps", "a", 80));
        store.event_process(&service_event("other", "b", 80));
        assert!(store.namespaces["apps"].relevant);
        assert!(!store.namespaces["other"].relevant);
    }

    #[test]
    fn test_pods_track_replicas() {
        let mut store = K8sStore::default();
        assert_eq!(store.replicas(), 1);
        for pod in ["ic-1", "ic-2", "ic-1"] {
            store.event_process(&SyncDataEvent::new("default", pod, EventData::Pod(pod.to_string())));
        }
        assert_eq!(store.replicas(), 2);
        assert!(store.pods_changed());
        store.clean();
        assert!(!store.pods_changed());
    }
}
