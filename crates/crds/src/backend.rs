//! Backend CRD
//!
//! Backend settings applied over every backend that references the resource
//! with the `cr-backend` annotation (ingress, service or ConfigMap level).

use crate::defaults::Forwardfor;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Load-balancing algorithm.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Balance {
    /// roundrobin, leastconn, source, uri, ...
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

/// Cookie based persistence.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Cookie {
    pub name: String,
    /// insert, rewrite or prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default)]
    pub indirect: bool,
    #[serde(default)]
    pub nocache: bool,
    #[serde(default)]
    pub dynamic: bool,
}

/// `default-server` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DefaultServer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fall: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rise: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
    /// "none" or "required"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_proxy_v2: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
}

/// Settings applied over generated backends.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// "http" or "tcp"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Balance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwardfor: Option<Forwardfor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<DefaultServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abortonclose: Option<bool>,
    /// never, safe, aggressive or always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_reuse: Option<String>,
}

/// `ingress.v1.haproxy.org/v1` Backend.
pub mod v1 {
    use super::BackendConfig;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v1.haproxy.org",
        version = "v1",
        kind = "Backend",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct BackendSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub config: Option<BackendConfig>,
    }

    impl From<BackendSpec> for super::v3::BackendSpec {
        fn from(spec: BackendSpec) -> Self {
            Self { config: spec.config }
        }
    }
}

/// `ingress.v3.haproxy.org/v3` Backend.
pub mod v3 {
    use super::BackendConfig;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v3.haproxy.org",
        version = "v3",
        kind = "Backend",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct BackendSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub config: Option<BackendConfig>,
    }
}
