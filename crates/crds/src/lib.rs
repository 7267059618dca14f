//! HAProxy Ingress CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the ingress controller:
//! - `Global`, `Defaults`, `Backend`, `TCP` in both the `ingress.v1.haproxy.org`
//!   and `ingress.v3.haproxy.org` groups (identical shapes, v1 converts into v3)
//! - `Frontend` (v3 only)
//! - The Gateway API subset used for TCP routing (`Gateway`, `GatewayClass`,
//!   `TCPRoute`, `ReferenceGrant`)

pub mod backend;
pub mod defaults;
pub mod frontend;
pub mod gateway_api;
pub mod global;
pub mod tcp;

pub use backend::{BackendConfig, Balance, Cookie, DefaultServer};
pub use defaults::{DefaultsConfig, Forwardfor, Timeouts};
pub use frontend::{Frontend, FrontendConfig, FrontendSpec};
pub use gateway_api::*;
pub use global::{GlobalConfig, LogTarget};
pub use tcp::{TCPBind, TCPFrontend, TCPModel, TCPService};

/// API group of the v1 HAProxy custom resources.
pub const HAPROXY_V1_GROUP: &str = "ingress.v1.haproxy.org";

/// API group of the v3 HAProxy custom resources.
pub const HAPROXY_V3_GROUP: &str = "ingress.v3.haproxy.org";
