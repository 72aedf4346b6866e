//! Error types for the control-plane client.

use thiserror::Error;

/// Errors that can occur when calling the control plane.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport error (connection, timeout, body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The control plane answered with a non-success status.
    #[error("control plane returned {status} for {path}")]
    Status { status: u16, path: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
