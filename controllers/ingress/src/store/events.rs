//! Canonical watch events.

use super::types::*;
use crds::global::v3::GlobalSpec;
use crds::defaults::v3::DefaultsSpec;
use crds::backend::v3::BackendSpec;
use crds::tcp::v3::TCPSpec;
use crds::FrontendSpec;
use std::fmt;

/// Event channel capacity, 6x the 100-event default of a watch channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 600;

/// Watched resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncType {
    Namespace,
    Ingress,
    IngressClass,
    Service,
    Endpoints,
    Secret,
    ConfigMap,
    Pod,
    Gateway,
    GatewayClass,
    TcpRoute,
    ReferenceGrant,
    Global,
    Defaults,
    Backend,
    Tcp,
    Frontend,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Converted object carried by an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Namespace(NamespaceInfo),
    Ingress(Ingress),
    IngressClass(IngressClass),
    Service(Service),
    Endpoints(Endpoints),
    Secret(Secret),
    ConfigMap(ConfigMap),
    /// Name of a controller replica
    Pod(String),
    Gateway(Gateway),
    GatewayClass(GatewayClass),
    TcpRoute(TcpRoute),
    ReferenceGrant(ReferenceGrant),
    Global(CustomResource<GlobalSpec>),
    Defaults(CustomResource<DefaultsSpec>),
    Backend(CustomResource<BackendSpec>),
    Tcp(CustomResource<TCPSpec>),
    Frontend(CustomResource<FrontendSpec>),
}

impl EventData {
    /// Kind of the carried resource.
    pub fn sync_type(&self) -> SyncType {
        match self {
            Self::Namespace(_) => SyncType::Namespace,
            Self::Ingress(_) => SyncType::Ingress,
            Self::IngressClass(_) => SyncType::IngressClass,
            Self::Service(_) => SyncType::Service,
            Self::Endpoints(_) => SyncType::Endpoints,
            Self::Secret(_) => SyncType::Secret,
            Self::ConfigMap(_) => SyncType::ConfigMap,
            Self::Pod(_) => SyncType::Pod,
            Self::Gateway(_) => SyncType::Gateway,
            Self::GatewayClass(_) => SyncType::GatewayClass,
            Self::TcpRoute(_) => SyncType::TcpRoute,
            Self::ReferenceGrant(_) => SyncType::ReferenceGrant,
            Self::Global(_) => SyncType::Global,
            Self::Defaults(_) => SyncType::Defaults,
            Self::Backend(_) => SyncType::Backend,
            Self::Tcp(_) => SyncType::Tcp,
            Self::Frontend(_) => SyncType::Frontend,
        }
    }
}

/// An event published by a watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDataEvent {
    pub sync_type: SyncType,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: String,
    pub data: EventData,
    pub deleted: bool,
}

impl SyncDataEvent {
    /// Event for `namespace/name`, without version tracking.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, data: EventData) -> Self {
        Self {
            sync_type: data.sync_type(),
            namespace: namespace.into(),
            name: name.into(),
            uid: String::new(),
            resource_version: String::new(),
            data,
            deleted: false,
        }
    }

    /// Attaches the uid and resourceVersion the event was observed at.
    #[must_use]
    pub fn with_version(mut self, uid: impl Into<String>, resource_version: impl Into<String>) -> Self {
        self.uid = uid.into();
        self.resource_version = resource_version.into();
        self
    }

    /// Marks the event as a deletion.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}
