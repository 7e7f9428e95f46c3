//! Controller-specific error types.
//!
//! This module defines error types specific to the cloud controller manager
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use thiserror::Error;
use yandex_cloud_client::CloudError;

/// Errors that can occur in the cloud controller manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Yandex Cloud API error
    #[error("Yandex Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request rejected before any remote call was made
    #[error("Validation failed: {0}")]
    Validation(String),

    /// providerID that does not parse
    #[error("Invalid providerID: {0}")]
    InvalidProviderId(String),

    /// Node has no backing compute instance
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Instance data the controller cannot work with
    #[error("Invalid instance {0}: {1}")]
    InvalidInstance(String, String),

    /// Target group the balancer must attach does not exist
    #[error("Target group not found: {0}")]
    TargetGroupNotFound(String),

    /// Node missing from the lister or without the address a route needs
    #[error("Node {0}: {1}")]
    Node(String, String),

    /// Reconciliation cycle exceeded its deadline
    #[error("Reconciliation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether requeueing the item with backoff can make progress.
    ///
    /// Ambiguous cloud state and invalid input need an operator, retrying them
    /// only burns API quota.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Cloud(e) => e.is_retryable(),
            ControllerError::Validation(_)
            | ControllerError::InvalidProviderId(_)
            | ControllerError::InvalidConfig(_) => false,
            _ => true,
        }
    }
}
