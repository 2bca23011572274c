//! Image resolution errors

use thiserror::Error;

/// Errors that can occur while resolving an image reference
#[derive(Debug, Error)]
pub enum ImageError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Registry rejected the token request or the token itself
    #[error("Registry authentication failed: {0}")]
    Authentication(String),

    /// Registry answered with an unexpected status
    #[error("Registry error ({status}): {message}")]
    Registry {
        /// HTTP status code
        status: u16,
        /// Reference that was being resolved
        message: String,
    },

    /// Manifest response carried no `Docker-Content-Digest` header
    #[error("Registry returned no digest for {0}")]
    MissingDigest(String),
}
