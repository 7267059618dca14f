//! Defaults CRD
//!
//! Overrides of the HAProxy `defaults` section. Referenced from the controller
//! ConfigMap with `cr-defaults: <namespace>/<name>`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Section timeouts, HAProxy time format ("5s", "1m").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Timeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_keep_alive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_fin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_fin: Option<String>,
}

/// `option forwardfor` settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Forwardfor {
    #[serde(default)]
    pub enabled: bool,
    /// CIDR excluded from header insertion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub ifnone: bool,
}

/// Settings applied over the generated `defaults` section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DefaultsConfig {
    /// "http" or "tcp"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,

    #[serde(default)]
    pub timeouts: Timeouts,

    /// "http-keep-alive", "http-server-close" or "httpclose"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_connection_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwardfor: Option<Forwardfor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dontlognull: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redispatch: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i64>,
}

/// `ingress.v1.haproxy.org/v1` Defaults.
pub mod v1 {
    use super::DefaultsConfig;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v1.haproxy.org",
        version = "v1",
        kind = "Defaults",
        plural = "defaults",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct DefaultsSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub config: Option<DefaultsConfig>,
    }

    impl From<DefaultsSpec> for super::v3::DefaultsSpec {
        fn from(spec: DefaultsSpec) -> Self {
            Self { config: spec.config }
        }
    }
}

/// `ingress.v3.haproxy.org/v3` Defaults.
pub mod v3 {
    use super::DefaultsConfig;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v3.haproxy.org",
        version = "v3",
        kind = "Defaults",
        plural = "defaults",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct DefaultsSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub config: Option<DefaultsConfig>,
    }
}
