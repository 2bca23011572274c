//! Controller-specific error types.
//!
//! Every variant is retryable: the watch loop requeues the AuditConfig and
//! the next pass starts from scratch. Conflicts are retried quickly because
//! they only mean another writer got there first.

use cluster_client::ClusterError;
use image_resolver::ImageError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the AuditConfig controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client setup or watch error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster API call failed
    #[error("Cluster API error: {0}")]
    Cluster(#[from] ClusterError),

    /// Scanner or operator image could not be resolved
    #[error("Image resolution failed: {0}")]
    Image(#[from] ImageError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Inventory or status could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Reconcile pass exceeded its deadline
    #[error("Reconciliation timed out after {0}s")]
    Timeout(u64),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Probe server failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Optimistic concurrency conflict on update
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Cluster(e) if e.is_conflict())
    }
}

impl From<serde_yaml::Error> for ControllerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for ControllerError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
