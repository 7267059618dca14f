//! Gateway (gateway.networking.k8s.io/v1beta1)

use super::common::{Condition, LabelSelector, RouteGroupKind};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where routes attaching to a listener may live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum FromNamespaces {
    All,
    #[default]
    Same,
    Selector,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteNamespaces {
    #[serde(default)]
    pub from: FromNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedRoutes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<RouteNamespaces>,
    #[serde(default)]
    pub kinds: Vec<RouteGroupKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTLSConfig {
    /// "Terminate" or "Passthrough"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub port: i32,
    /// Only "TCP" listeners are served
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<GatewayTLSConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_routes: Option<AllowedRoutes>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "Gateway",
    namespaced,
    status = "GatewayStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    pub gateway_class_name: String,
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    pub name: String,
    #[serde(default)]
    pub supported_kinds: Vec<RouteGroupKind>,
    #[serde(default)]
    pub attached_routes: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub listeners: Vec<ListenerStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_spec_deserializes_camel_case() {
        let spec: GatewaySpec = serde_json::from_value(serde_json::json!({
            "gatewayClassName": "haproxy",
            "listeners": [{
                "name": "tcp-8000",
                "port": 8000,
                "protocol": "TCP",
                "allowedRoutes": {
                    "namespaces": {"from": "All"},
                    "kinds": [{"kind": "TCPRoute"}]
                }
            }]
        }))
        .unwrap();

        assert_eq!(spec.gateway_class_name, "haproxy");
        let listener = &spec.listeners[0];
        assert_eq!(listener.port, 8000);
        let allowed = listener.allowed_routes.as_ref().unwrap();
        assert_eq!(
            allowed.namespaces.as_ref().unwrap().from,
            FromNamespaces::All
        );
        assert_eq!(allowed.kinds[0].kind, "TCPRoute");
    }

    #[test]
    fn test_from_namespaces_defaults_to_same() {
        let ns: RouteNamespaces = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(ns.from, FromNamespaces::Same);
    }
}
