//! Controller-specific error types.
//!
//! Errors raised by the API controller itself. Driver failures have their
//! own type in `drivers` and are folded into [`ControllerError::Sync`] once
//! they have been written to status.

use gateway_client::GatewayError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the API controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Control-plane client error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// One or more steps of a sync failed; the item should be retried
    #[error("Sync of {key} failed: {reasons}")]
    Sync {
        /// namespace/name of the ApiExposure
        key: String,
        /// Failure summaries joined with "; "
        reasons: String,
    },

    /// Status write-back lost an optimistic-concurrency race
    #[error("Status of {0} changed concurrently")]
    StatusConflict(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics or health check server failed
    #[error("Metrics server failed: {0}")]
    Server(#[from] std::io::Error),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
