//! Cluster client errors

use thiserror::Error;

/// Errors returned by [`crate::ClusterClient`] operations.
///
/// The variants the reconcilers branch on (`NotFound`, `AlreadyExists`,
/// `Conflict`) are split out of the raw API status; everything else is kept
/// as `Api` with the HTTP code.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with an existing object of the same name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resource version mismatch on update
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other API status (forbidden, invalid, server error)
    #[error("Kubernetes API error ({code}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Server-provided message
        message: String,
    },

    /// Object could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport or client-side failure
    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),
}

impl ClusterError {
    /// Object was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Create found an existing object
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Optimistic concurrency check failed
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => {
                let message = ae.message.to_string();
                match (ae.code, ae.reason.to_string().as_str()) {
                    (404, _) => Self::NotFound(message),
                    (409, "AlreadyExists") => Self::AlreadyExists(message),
                    (409, _) => Self::Conflict(message),
                    (code, _) => Self::Api { code, message },
                }
            }
            other => Self::Kube(other),
        }
    }
}
