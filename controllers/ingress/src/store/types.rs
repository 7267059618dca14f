//! Canonical resource types kept in the store.
//!
//! Watchers convert Kubernetes objects into these types, dropping every
//! field the controller does not read so equality reflects relevant changes
//! only.

use chrono::{DateTime, Utc};
use crds::{GatewaySpec, ReferenceGrantSpec, TCPRouteSpec};
use std::collections::{BTreeMap, BTreeSet};

/// Status of an object within the current sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    Added,
    Modified,
    Deleted,
    #[default]
    Empty,
}

/// A stored object with its sync status.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    pub data: T,
    pub status: Status,
}

impl<T> Tracked<T> {
    pub fn added(data: T) -> Self {
        Self {
            data,
            status: Status::Added,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == Status::Deleted
    }

    /// Added, modified or deleted since the last sync.
    pub fn is_changed(&self) -> bool {
        self.status != Status::Empty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize)]
pub enum PathType {
    Exact,
    Prefix,
    #[default]
    ImplementationSpecific,
}

impl std::str::FromStr for PathType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Exact" => Ok(Self::Exact),
            "Prefix" => Ok(Self::Prefix),
            "" | "ImplementationSpecific" => Ok(Self::ImplementationSpecific),
            other => Err(format!("unknown path type '{other}'")),
        }
    }
}

/// Service port referenced by an ingress backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum PortRef {
    Number(i32),
    Name(String),
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(port) => write!(f, "{port}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct IngressPath {
    pub path: String,
    pub path_type: PathType,
    pub service: String,
    pub port: PortRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct IngressTls {
    pub hosts: Vec<String>,
    pub secret_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ingress {
    pub namespace: String,
    pub name: String,
    /// `spec.ingressClassName`
    pub class_name: Option<String>,
    pub annotations: BTreeMap<String, String>,
    pub default_backend: Option<IngressPath>,
    pub rules: Vec<IngressRule>,
    pub tls: Vec<IngressTls>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IngressClass {
    pub name: String,
    pub controller: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServicePort {
    pub name: String,
    pub protocol: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
    pub external_name: Option<String>,
}

impl Service {
    /// Resolves an ingress port reference to a service port.
    pub fn port(&self, port: &PortRef) -> Option<&ServicePort> {
        match port {
            PortRef::Number(number) => self.ports.iter().find(|p| p.port == *number),
            PortRef::Name(name) => self.ports.iter().find(|p| p.name == *name),
        }
    }
}

/// Ready addresses of one named endpoint port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortEndpoints {
    pub port: i32,
    pub addresses: BTreeSet<String>,
}

/// One EndpointSlice (or legacy Endpoints object) of a service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Endpoints {
    pub namespace: String,
    pub service: String,
    pub slice_name: String,
    /// Keyed by port name
    pub ports: BTreeMap<String, PortEndpoints>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub secret_type: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigMap {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewayClass {
    pub name: String,
    pub controller_name: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gateway {
    pub namespace: String,
    pub name: String,
    pub generation: Option<i64>,
    pub spec: GatewaySpec,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TcpRoute {
    pub namespace: String,
    pub name: String,
    pub generation: Option<i64>,
    pub creation_timestamp: DateTime<Utc>,
    pub spec: TCPRouteSpec,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceGrant {
    pub namespace: String,
    pub name: String,
    pub spec: ReferenceGrantSpec,
}

/// A HAProxy custom resource, stored in its v3 shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomResource<T> {
    pub namespace: String,
    pub name: String,
    pub spec: T,
}
