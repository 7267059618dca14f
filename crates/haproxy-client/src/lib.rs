//! HAProxy Client
//!
//! Configuration and runtime access to the HAProxy instance managed by the
//! ingress controller.
//!
//! # Example
//!
//! ```no_run
//! use haproxy_client::{Backend, ConfigClient, Configuration, Mode, RuntimeClient, RuntimeClientTrait, ServerState};
//!
//! # async fn example() -> Result<(), haproxy_client::HAProxyError> {
//! let mut client = ConfigClient::new("/etc/haproxy/haproxy.cfg", Configuration::default());
//!
//! // Stage edits and commit them to haproxy.cfg
//! let mut txn = client.transaction_start()?;
//! txn.backend_create_if_not_exists(Backend::new("default_app_http", Mode::Http));
//! client.transaction_commit(txn).await?;
//!
//! // Live update a server without reloading
//! let runtime = RuntimeClient::new("/var/run/haproxy/haproxy-runtime-api.sock");
//! runtime.set_server_addr("default_app_http", "SRV_1", "10.0.0.6", 8080).await?;
//! runtime.set_server_state("default_app_http", "SRV_1", ServerState::Ready).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Transactions**: staged edits over a working copy, commit elided when nothing changed
//! - **Deterministic rendering**: identical models render byte-identical files
//! - **Runtime API**: server address/state, map content, raw commands

pub mod config;
pub mod error;
pub mod models;
pub mod runtime;
#[path = "trait.rs"]
pub mod runtime_trait;
pub mod transaction;
#[cfg(feature = "test-util")]
pub mod mock;

pub use config::{BackendSection, Configuration, FrontendSection, SectionRules};
pub use error::HAProxyError;
pub use models::*;
pub use runtime::{RuntimeClient, ServerState};
pub use runtime_trait::RuntimeClientTrait;
pub use transaction::{write_atomic, ConfigClient, ParentType, Transaction};
#[cfg(feature = "test-util")]
pub use mock::MockRuntimeClient;
