//! Controller-specific error types.
//!
//! This module defines error types specific to the CSI snapshot operator
//! that are not covered by upstream library errors.

use cluster_client::ClientError;
use thiserror::Error;

/// Errors that can occur in the CSI snapshot operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client construction error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object store error outside of a synchronization step
    #[error("{0}")]
    Client(#[from] ClientError),

    /// The operator config object is not (yet) visible
    #[error("operator config {0} not found")]
    ConfigNotFound(String),

    /// Applying the snapshot CRDs failed
    #[error("failed to sync CRDs: {0}")]
    SyncCrds(#[source] ClientError),

    /// Applying the operand Deployment failed
    #[error("failed to sync Deployments: {0}")]
    SyncDeployments(#[source] ClientError),

    /// Writing the operator status failed
    #[error("failed to update status: {0}")]
    StatusUpdate(#[source] ClientError),

    /// Embedded manifest could not be parsed
    #[error("Invalid manifest {name}: {source}")]
    Manifest {
        /// Asset name
        name: String,
        /// Parse error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation panicked
    #[error("Reconciliation panicked: {0}")]
    Panic(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the error came from a write conflict on the object store.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Client(e)
            | Self::SyncCrds(e)
            | Self::SyncDeployments(e)
            | Self::StatusUpdate(e) => e.is_conflict(),
            _ => false,
        }
    }
}
