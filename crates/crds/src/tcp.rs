//! TCP CRD
//!
//! Declares raw TCP frontends, each forwarding to one service port.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A bind line of a TCP frontend.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TCPBind {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub port: i64,
    #[serde(default)]
    pub ssl: bool,
    /// Path of the certificate file or directory, relative to the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate: Option<String>,
    #[serde(default)]
    pub v4v6: bool,
    #[serde(default)]
    pub accept_proxy: bool,
}

/// Frontend part of a TCP model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TCPFrontend {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
    #[serde(default)]
    pub tcplog: bool,
    #[serde(default)]
    pub binds: Vec<TCPBind>,
}

/// Target service of a TCP model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TCPService {
    pub name: String,
    pub port: i64,
}

/// One TCP frontend → service mapping.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TCPModel {
    pub name: String,
    pub frontend: TCPFrontend,
    pub service: TCPService,
}

/// `ingress.v1.haproxy.org/v1` TCP.
pub mod v1 {
    use super::TCPModel;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v1.haproxy.org",
        version = "v1",
        kind = "TCP",
        plural = "tcps",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct TCPSpec {
        #[serde(default)]
        pub services: Vec<TCPModel>,
    }

    impl From<TCPSpec> for super::v3::TCPSpec {
        fn from(spec: TCPSpec) -> Self {
            Self {
                services: spec.services,
            }
        }
    }
}

/// `ingress.v3.haproxy.org/v3` TCP.
pub mod v3 {
    use super::TCPModel;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v3.haproxy.org",
        version = "v3",
        kind = "TCP",
        plural = "tcps",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct TCPSpec {
        #[serde(default)]
        pub services: Vec<TCPModel>,
    }
}
