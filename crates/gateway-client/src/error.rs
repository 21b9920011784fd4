//! Gateway client errors

use thiserror::Error;

/// Errors that can occur when talking to the control plane
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// resourceVersion precondition failed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server rejected or failed the request
    #[error("Gateway API error: {0}")]
    Api(String),
}

impl GatewayError {
    /// Classify a kube error for the object described by `what`.
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ref e) if e.code == 404 => GatewayError::NotFound(what.into()),
            kube::Error::Api(ref e) if e.code == 409 && e.reason == "AlreadyExists" => {
                GatewayError::AlreadyExists(what.into())
            }
            kube::Error::Api(ref e) if e.code == 409 => {
                GatewayError::Conflict(format!("{}: {}", what.into(), e.message))
            }
            other => GatewayError::Kube(other),
        }
    }

    /// True for [`GatewayError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    /// True for [`GatewayError::AlreadyExists`]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, GatewayError::AlreadyExists(_))
    }

    /// True for [`GatewayError::Conflict`]
    pub fn is_conflict(&self) -> bool {
        matches!(self, GatewayError::Conflict(_))
    }
}
