//! Global CRD
//!
//! Overrides of the HAProxy `global` section. Referenced from the controller
//! ConfigMap with `cr-global: <namespace>/<name>`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Settings applied over the generated `global` section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Process-wide connection limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,

    /// Number of worker threads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbthread: Option<i64>,

    /// Maximum time old workers may linger after a reload (e.g. "30m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_stop_after: Option<String>,

    /// Timeout of the stats socket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_default_bind_ciphers: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_default_bind_ciphersuites: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_default_bind_options: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tune_ssl_default_dh_param: Option<i64>,

    /// Hostname sent in syslog headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_send_hostname: Option<String>,

    /// Percentage of randomness added to health-check intervals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_checks: Option<i64>,
}

/// A syslog destination.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogTarget {
    /// Syslog address (`127.0.0.1:514`, `stdout`, `/dev/log`)
    #[serde(default)]
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,

    /// Emits `log global` instead of an address line
    #[serde(default)]
    pub global: bool,
}

/// `ingress.v1.haproxy.org/v1` Global.
pub mod v1 {
    use super::{GlobalConfig, LogTarget};
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v1.haproxy.org",
        version = "v1",
        kind = "Global",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct GlobalSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub config: Option<GlobalConfig>,

        #[serde(default)]
        pub log_targets: Vec<LogTarget>,
    }

    impl From<GlobalSpec> for super::v3::GlobalSpec {
        fn from(spec: GlobalSpec) -> Self {
            Self {
                config: spec.config,
                log_targets: spec.log_targets,
            }
        }
    }
}

/// `ingress.v3.haproxy.org/v3` Global.
pub mod v3 {
    use super::{GlobalConfig, LogTarget};
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
    #[kube(
        group = "ingress.v3.haproxy.org",
        version = "v3",
        kind = "Global",
        namespaced
    )]
    #[serde(rename_all = "snake_case")]
    pub struct GlobalSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub config: Option<GlobalConfig>,

        #[serde(default)]
        pub log_targets: Vec<LogTarget>,
    }
}
