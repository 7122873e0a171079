//! Error types for the maintenance supervisor

use std::time::Duration;

use thiserror::Error;

use crate::crd::SpecValidationError;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed spec or generation, rejected before any evaluation
    #[error("Validation failed: {}", format_validation_errors(.0))]
    ValidationError(Vec<SpecValidationError>),

    /// The object does not exist in the store
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Stale write: the object's resourceVersion moved since it was read
    #[error("Conflict writing {namespace}/{name}: {message}")]
    Conflict {
        namespace: String,
        name: String,
        message: String,
    },

    /// A wait ran out of time before its condition held
    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    /// A wait was aborted by its cancellation signal
    #[error("Wait for {0} was cancelled")]
    Cancelled(String),

    /// Transport-level failure that is worth retrying
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn format_validation_errors(errors: &[SpecValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// HTTP status codes the API server returns for conditions that clear up on their own
const TRANSIENT_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

impl Error {
    /// Whether the error is expected to clear up if the operation is retried
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transient(_) | Error::Conflict { .. } => true,
            Error::KubeError(e) => is_transient_kube_error(e),
            _ => false,
        }
    }

    /// Whether the error means the object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Whether the error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ValidationError(_) => "validation",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Timeout(..) => "timeout",
            Error::Cancelled(_) => "cancelled",
            Error::Transient(_) => "transient",
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
        }
    }
}

fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => TRANSIENT_STATUS_CODES.contains(&resp.code),
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}
