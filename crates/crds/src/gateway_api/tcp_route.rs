//! TCPRoute (gateway.networking.k8s.io/v1alpha2)

use super::common::{BackendRef, Condition, ParentReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TCPRouteRule {
    #[serde(default)]
    pub backend_refs: Vec<BackendRef>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "TCPRoute",
    plural = "tcproutes",
    namespaced,
    status = "TCPRouteStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TCPRouteSpec {
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
    #[serde(default)]
    pub rules: Vec<TCPRouteRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    pub parent_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TCPRouteStatus {
    #[serde(default)]
    pub parents: Vec<RouteParentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_route_spec_deserializes() {
        let spec: TCPRouteSpec = serde_json::from_value(serde_json::json!({
            "parentRefs": [{"name": "gw", "sectionName": "tcp-8000"}],
            "rules": [{"backendRefs": [{"name": "echo", "port": 9000, "namespace": "apps"}]}]
        }))
        .unwrap();

        assert_eq!(spec.parent_refs[0].name, "gw");
        assert_eq!(spec.parent_refs[0].section_name.as_deref(), Some("tcp-8000"));
        let backend = &spec.rules[0].backend_refs[0];
        assert_eq!(backend.name, "echo");
        assert_eq!(backend.port, Some(9000));
        assert_eq!(backend.namespace.as_deref(), Some("apps"));
    }
}
