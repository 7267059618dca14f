//! Frontend CRD
//!
//! Settings applied over one of the controller-managed frontends
//! (`http`, `https`, `stats`). Only defined in the v3 group.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Frontend-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FrontendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_keep_alive_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_request_timeout: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "ingress.v3.haproxy.org",
    version = "v3",
    kind = "Frontend",
    namespaced
)]
#[serde(rename_all = "snake_case")]
pub struct FrontendSpec {
    /// Name of the controller frontend the settings apply to
    pub frontend: String,

    #[serde(default)]
    pub config: FrontendConfig,
}
