//! Gateway API subset
//!
//! Only the fields the controller consumes for TCP routing are modelled:
//! - `Gateway` / `GatewayClass` (gateway.networking.k8s.io/v1beta1)
//! - `TCPRoute` / `ReferenceGrant` (gateway.networking.k8s.io/v1alpha2)

pub mod common;
pub mod gateway;
pub mod gateway_class;
pub mod reference_grant;
pub mod tcp_route;

pub use common::*;
pub use gateway::*;
pub use gateway_class::*;
pub use reference_grant::*;
pub use tcp_route::*;

/// API group shared by every Gateway API kind.
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
