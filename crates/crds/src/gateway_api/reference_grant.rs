//! ReferenceGrant (gateway.networking.k8s.io/v1alpha2)
//!
//! Allows routes in other namespaces to reference objects in the grant's
//! namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantFrom {
    pub group: String,
    pub kind: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantTo {
    /// Empty string means the core group
    #[serde(default)]
    pub group: String,
    pub kind: String,
    /// Unset allows every object of the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "ReferenceGrant",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantSpec {
    #[serde(default)]
    pub from: Vec<ReferenceGrantFrom>,
    #[serde(default)]
    pub to: Vec<ReferenceGrantTo>,
}

impl ReferenceGrantSpec {
    /// Returns true when a `from_kind` object in `from_namespace` may
    /// reference the `to_kind` object `to_name` in the grant's namespace.
    pub fn allows(
        &self,
        from_group: &str,
        from_kind: &str,
        from_namespace: &str,
        to_group: &str,
        to_kind: &str,
        to_name: &str,
    ) -> bool {
        let from_ok = self.from.iter().any(|from| {
            from.group == from_group && from.kind == from_kind && from.namespace == from_namespace
        });
        if !from_ok {
            return false;
        }
        self.to.iter().any(|to| {
            to.group == to_group
                && to.kind == to_kind
                && to.name.as_deref().is_none_or(|name| name == to_name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(name: Option<&str>) -> ReferenceGrantSpec {
        ReferenceGrantSpec {
            from: vec![ReferenceGrantFrom {
                group: "gateway.networking.k8s.io".to_string(),
                kind: "TCPRoute".to_string(),
                namespace: "routes".to_string(),
            }],
            to: vec![ReferenceGrantTo {
                group: String::new(),
                kind: "Service".to_string(),
                name: name.map(str::to_string),
            }],
        }
    }

    #[test]
    fn test_grant_without_name_allows_any_service() {
        let g = grant(None);
        assert!(g.allows("gateway.networking.k8s.io", "TCPRoute", "routes", "", "Service", "a"));
        assert!(g.allows("gateway.networking.k8s.io", "TCPRoute", "routes", "", "Service", "b"));
    }

    #[test]
    fn test_grant_checks_namespace_and_name() {
        let g = grant(Some("echo"));
        assert!(g.allows("gateway.networking.k8s.io", "TCPRoute", "routes", "", "Service", "echo"));
        assert!(!g.allows("gateway.networking.k8s.io", "TCPRoute", "routes", "", "Service", "other"));
        assert!(!g.allows("gateway.networking.k8s.io", "TCPRoute", "elsewhere", "", "Service", "echo"));
        assert!(!g.allows("gateway.networking.k8s.io", "TCPRoute", "routes", "", "Secret", "echo"));
    }
}
