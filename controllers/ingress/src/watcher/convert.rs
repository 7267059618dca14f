//! Kubernetes objects to canonical store events.

use crate::store::events::{EventData, SyncDataEvent};
use crate::store::types::{
    self, ConfigMap, CustomResource, Endpoints, Gateway, GatewayClass, IngressClass, IngressPath,
    IngressRule, IngressTls, NamespaceInfo, PathType, PortEndpoints, PortRef, ReferenceGrant, Secret,
    Service, ServicePort, TcpRoute,
};
use crate::utils::hash::fnv64a;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::api::discovery::v1 as discovery;
use k8s_openapi::api::networking::v1 as networking;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

/// Label carrying the owning service of an EndpointSlice.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Control-plane leader election objects, never backends.
const IGNORED_KUBE_SYSTEM: [&str; 2] = ["kube-controller-manager", "kube-scheduler"];

fn ignored(namespace: &str, name: &str) -> bool {
    namespace == "kube-system" && IGNORED_KUBE_SYSTEM.contains(&name)
}

fn event(meta: &ObjectMeta, data: EventData) -> SyncDataEvent {
    SyncDataEvent::new(
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
        data,
    )
    .with_version(
        meta.uid.clone().unwrap_or_default(),
        meta.resource_version.clone().unwrap_or_default(),
    )
}

fn name_of(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

fn namespace_of(meta: &ObjectMeta) -> String {
    meta.namespace.clone().unwrap_or_default()
}

/// Creation timestamp through its RFC 3339 form.
pub fn timestamp(time: Option<&Time>) -> DateTime<Utc> {
    time.and_then(|t| serde_json::to_value(t).ok())
        .and_then(|value| value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

pub fn namespace(ns: &core::Namespace) -> Option<SyncDataEvent> {
    let name = name_of(&ns.metadata);
    let info = NamespaceInfo {
        name: name.clone(),
        labels: ns.metadata.labels.clone().unwrap_or_default(),
    };
    Some(event(&ns.metadata, EventData::Namespace(info)))
}

fn ingress_path(path: Option<&str>, path_type: &str, backend: &networking::IngressBackend) -> Option<IngressPath> {
    let service = backend.service.as_ref()?;
    let port = service.port.as_ref()?;
    let port = match (port.number, &port.name) {
        (Some(number), _) => PortRef::Number(number),
        (None, Some(name)) => PortRef::Name(name.clone()),
        (None, None) => return None,
    };
    let path_type = match path_type.parse::<PathType>() {
        Ok(path_type) => path_type,
        Err(e) => {
            warn!("ingress backend {}: {}", service.name, e);
            return None;
        }
    };
    Some(IngressPath {
        path: path.unwrap_or_default().to_string(),
        path_type,
        service: service.name.clone(),
        port,
    })
}

fn hash_of<T: serde::Serialize>(value: &T) -> u64 {
    fnv64a(&serde_json::to_vec(value).unwrap_or_default())
}

/// Drops duplicate TLS hosts, TLS entries and rules. Semantics are unchanged.
pub fn dedup_ingress(ingress: &mut types::Ingress) {
    let id = format!("{}/{}", ingress.namespace, ingress.name);

    for tls in &mut ingress.tls {
        let mut seen = HashSet::new();
        let before = tls.hosts.len();
        tls.hosts.retain(|host| seen.insert(host.clone()));
        if tls.hosts.len() != before {
            warn!(ingress = %id, secret = %tls.secret_name, "duplicate TLS hosts removed");
        }
    }

    let mut seen = HashSet::new();
    let before = ingress.tls.len();
    ingress.tls.retain(|tls| {
        let mut hosts = tls.hosts.clone();
        hosts.sort();
        seen.insert((tls.secret_name.clone(), hash_of(&hosts)))
    });
    if ingress.tls.len() != before {
        warn!(ingress = %id, "{} duplicate TLS entries removed", before - ingress.tls.len());
    }

    let mut seen = HashSet::new();
    let before = ingress.rules.len();
    ingress.rules.retain(|rule| seen.insert((rule.host.clone(), hash_of(&rule.paths))));
    if ingress.rules.len() != before {
        warn!(ingress = %id, "{} duplicate rules removed", before - ingress.rules.len());
    }
}

pub fn ingress(ing: &networking::Ingress) -> Option<SyncDataEvent> {
    let spec = ing.spec.clone().unwrap_or_default();
    let mut ingress = types::Ingress {
        namespace: namespace_of(&ing.metadata),
        name: name_of(&ing.metadata),
        class_name: spec.ingress_class_name.clone(),
        annotations: ing.metadata.annotations.clone().unwrap_or_default(),
        default_backend: spec
            .default_backend
            .as_ref()
            .and_then(|backend| ingress_path(None, "ImplementationSpecific", backend)),
        rules: spec
            .rules
            .unwrap_or_default()
            .into_iter()
            .map(|rule| IngressRule {
                host: rule.host.unwrap_or_default(),
                paths: rule
                    .http
                    .map(|http| {
                        http.paths
                            .iter()
                            .filter_map(|p| ingress_path(p.path.as_deref(), &p.path_type, &p.backend))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect(),
        tls: spec
            .tls
            .unwrap_or_default()
            .into_iter()
            .map(|tls| IngressTls {
                hosts: tls.hosts.unwrap_or_default(),
                secret_name: tls.secret_name.unwrap_or_default(),
            })
            .collect(),
    };
    dedup_ingress(&mut ingress);
    Some(event(&ing.metadata, EventData::Ingress(ingress)))
}

pub fn ingress_class(class: &networking::IngressClass) -> Option<SyncDataEvent> {
    let data = IngressClass {
        name: name_of(&class.metadata),
        controller: class
            .spec
            .as_ref()
            .and_then(|spec| spec.controller.clone())
            .unwrap_or_default(),
    };
    Some(event(&class.metadata, EventData::IngressClass(data)))
}

pub fn service(svc: &core::Service) -> Option<SyncDataEvent> {
    let namespace = namespace_of(&svc.metadata);
    let name = name_of(&svc.metadata);
    if ignored(&namespace, &name) {
        return None;
    }
    let spec = svc.spec.clone().unwrap_or_default();
    let data = Service {
        namespace,
        name,
        annotations: svc.metadata.annotations.clone().unwrap_or_default(),
        ports: spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| ServicePort {
                name: p.name.unwrap_or_default(),
                protocol: p.protocol.unwrap_or_else(|| "TCP".to_string()),
                port: p.port,
            })
            .collect(),
        external_name: spec.external_name.filter(|_| spec.type_.as_deref() == Some("ExternalName")),
    };
    Some(event(&svc.metadata, EventData::Service(data)))
}

pub fn endpoint_slice(slice: &discovery::EndpointSlice) -> Option<SyncDataEvent> {
    let namespace = namespace_of(&slice.metadata);
    let service = slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SERVICE_NAME_LABEL))?
        .clone();
    if ignored(&namespace, &service) {
        return None;
    }

    let addresses: BTreeSet<String> = slice
        .endpoints
        .iter()
        .filter(|endpoint| {
            let conditions = endpoint.conditions.as_ref();
            let ready = conditions.and_then(|c| c.ready).unwrap_or(true);
            let terminating = conditions.and_then(|c| c.terminating).unwrap_or(false);
            ready && !terminating
        })
        .flat_map(|endpoint| endpoint.addresses.iter().cloned())
        .collect();

    let mut ports = BTreeMap::new();
    for port in slice.ports.iter().flatten() {
        let Some(number) = port.port else {
            continue;
        };
        ports.insert(
            port.name.clone().unwrap_or_default(),
            PortEndpoints {
                port: number,
                addresses: addresses.clone(),
            },
        );
    }

    let data = Endpoints {
        namespace,
        service,
        slice_name: name_of(&slice.metadata),
        ports,
    };
    Some(event(&slice.metadata, EventData::Endpoints(data)))
}

/// Legacy Endpoints, used when the discovery API is unavailable.
pub fn endpoints(ep: &core::Endpoints) -> Option<SyncDataEvent> {
    let namespace = namespace_of(&ep.metadata);
    let name = name_of(&ep.metadata);
    if ignored(&namespace, &name) {
        return None;
    }

    let mut ports: BTreeMap<String, PortEndpoints> = BTreeMap::new();
    for subset in ep.subsets.iter().flatten() {
        let addresses: BTreeSet<String> = subset
            .addresses
            .iter()
            .flatten()
            .map(|address| address.ip.clone())
            .collect();
        for port in subset.ports.iter().flatten() {
            let entry = ports
                .entry(port.name.clone().unwrap_or_default())
                .or_insert_with(|| PortEndpoints {
                    port: port.port,
                    addresses: BTreeSet::new(),
                });
            entry.addresses.extend(addresses.iter().cloned());
        }
    }

    let data = Endpoints {
        namespace,
        service: name.clone(),
        slice_name: name,
        ports,
    };
    Some(event(&ep.metadata, EventData::Endpoints(data)))
}

pub fn secret(secret: &core::Secret) -> Option<SyncDataEvent> {
    let data = Secret {
        namespace: namespace_of(&secret.metadata),
        name: name_of(&secret.metadata),
        secret_type: secret.type_.clone().unwrap_or_else(|| "Opaque".to_string()),
        data: secret
            .data
            .as_ref()
            .map(|data| data.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
            .unwrap_or_default(),
    };
    Some(event(&secret.metadata, EventData::Secret(data)))
}

pub fn configmap(cm: &core::ConfigMap) -> Option<SyncDataEvent> {
    let data = ConfigMap {
        namespace: namespace_of(&cm.metadata),
        name: name_of(&cm.metadata),
        data: cm.data.clone().unwrap_or_default(),
    };
    Some(event(&cm.metadata, EventData::ConfigMap(data)))
}

/// Name prefix shared by the replicas of `pod_name`: a deployment pod is
/// `<name>-<replicaset hash>-<pod hash>`.
pub fn pod_prefix(pod_name: &str) -> String {
    let parts: Vec<&str> = pod_name.split('-').collect();
    if parts.len() <= 2 {
        return pod_name.to_string();
    }
    let mut prefix = parts[..parts.len() - 2].join("-");
    prefix.push('-');
    prefix
}

/// Controller replicas. A pod that is not running counts as deleted.
pub fn pod(pod: &core::Pod, prefix: &str) -> Option<SyncDataEvent> {
    let name = name_of(&pod.metadata);
    if !name.starts_with(prefix) {
        return None;
    }
    let running = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .is_some_and(|phase| phase == "Running");
    let ev = event(&pod.metadata, EventData::Pod(name));
    Some(if running { ev } else { ev.deleted() })
}

pub fn gateway_class(class: &crds::GatewayClass) -> Option<SyncDataEvent> {
    let data = GatewayClass {
        name: name_of(&class.metadata),
        controller_name: class.spec.controller_name.clone(),
    };
    Some(event(&class.metadata, EventData::GatewayClass(data)))
}

pub fn gateway(gw: &crds::Gateway) -> Option<SyncDataEvent> {
    let data = Gateway {
        namespace: namespace_of(&gw.metadata),
        name: name_of(&gw.metadata),
        generation: gw.metadata.generation,
        spec: gw.spec.clone(),
    };
    Some(event(&gw.metadata, EventData::Gateway(data)))
}

pub fn tcp_route(route: &crds::TCPRoute) -> Option<SyncDataEvent> {
    let data = TcpRoute {
        namespace: namespace_of(&route.metadata),
        name: name_of(&route.metadata),
        generation: route.metadata.generation,
        creation_timestamp: timestamp(route.metadata.creation_timestamp.as_ref()),
        spec: route.spec.clone(),
    };
    Some(event(&route.metadata, EventData::TcpRoute(data)))
}

pub fn reference_grant(grant: &crds::ReferenceGrant) -> Option<SyncDataEvent> {
    let data = ReferenceGrant {
        namespace: namespace_of(&grant.metadata),
        name: name_of(&grant.metadata),
        spec: grant.spec.clone(),
    };
    Some(event(&grant.metadata, EventData::ReferenceGrant(data)))
}

fn custom_resource<T>(meta: &ObjectMeta, spec: T) -> CustomResource<T> {
    CustomResource {
        namespace: namespace_of(meta),
        name: name_of(meta),
        spec,
    }
}

/// HAProxy custom resources of both API versions, stored as v3.
pub mod cr {
    use super::{custom_resource, event};
    use crate::store::events::{EventData, SyncDataEvent};
    use crds::{backend, defaults, global, tcp};

    pub fn global_v1(obj: &global::v1::Global) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone().into());
        Some(event(&obj.metadata, EventData::Global(spec)))
    }

    pub fn global_v3(obj: &global::v3::Global) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone());
        Some(event(&obj.metadata, EventData::Global(spec)))
    }

    pub fn defaults_v1(obj: &defaults::v1::Defaults) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone().into());
        Some(event(&obj.metadata, EventData::Defaults(spec)))
    }

    pub fn defaults_v3(obj: &defaults::v3::Defaults) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone());
        Some(event(&obj.metadata, EventData::Defaults(spec)))
    }

    pub fn backend_v1(obj: &backend::v1::Backend) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone().into());
        Some(event(&obj.metadata, EventData::Backend(spec)))
    }

    pub fn backend_v3(obj: &backend::v3::Backend) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone());
        Some(event(&obj.metadata, EventData::Backend(spec)))
    }

    pub fn tcp_v1(obj: &tcp::v1::TCP) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone().into());
        Some(event(&obj.metadata, EventData::Tcp(spec)))
    }

    pub fn tcp_v3(obj: &tcp::v3::TCP) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone());
        Some(event(&obj.metadata, EventData::Tcp(spec)))
    }

    pub fn frontend(obj: &crds::Frontend) -> Option<SyncDataEvent> {
        let spec = custom_resource(&obj.metadata, obj.spec.clone());
        Some(event(&obj.metadata, EventData::Frontend(spec)))
    }
}
