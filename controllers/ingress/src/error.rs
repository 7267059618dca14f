//! Controller-specific error types.
//!
//! `ErrorPool` collects the failures of one sync so a single bad resource
//! never aborts the whole reconciliation.

use haproxy_client::HAProxyError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the ingress controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// HAProxy configuration or runtime API error
    #[error("HAProxy error: {0}")]
    HAProxy(#[from] HAProxyError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecognized annotation value, invalid duration, unknown path type...
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced object missing from the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// HAProxy process supervision failed
    #[error("Process error: {0}")]
    Process(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Several failures collected during one sync
    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ControllerError>),
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// Validation helper used by annotation parsers.
    pub fn validation(name: &str, value: &str, reason: impl std::fmt::Display) -> Self {
        Self::Validation(format!("annotation '{name}' value '{value}': {reason}"))
    }
}

/// Aggregates the errors of one sync.
#[derive(Debug, Default)]
pub struct ErrorPool {
    errors: Vec<ControllerError>,
}

impl ErrorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `err`, the sync goes on.
    pub fn add(&mut self, err: impl Into<ControllerError>) {
        self.errors.push(err.into());
    }

    /// Records the error of `result`, if any, and returns its value.
    pub fn collect<T, E: Into<ControllerError>>(&mut self, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.add(err);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of collected errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok` when nothing was collected, the single error when there is
    /// exactly one, `Aggregate` otherwise.
    pub fn into_result(mut self) -> Result<(), ControllerError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(ControllerError::Aggregate(self.errors)),
        }
    }
}
