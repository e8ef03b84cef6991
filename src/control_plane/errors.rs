//! # Control Plane Errors
//!
//! Error types for the push channel. Nothing here ever surfaces to a
//! request; the client recovers by reconnecting with backoff.

use thiserror::Error;

/// Result type for control plane operations
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Control plane errors
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The configured endpoint is not a usable WebSocket URL
    #[error("Invalid control plane URL '{0}'")]
    InvalidUrl(String),

    /// Connecting or handshaking failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The channel closed while a message was being sent
    #[error("Failed to send message: {0}")]
    Send(String),

    /// A frame was not valid JSON
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// A `config_snapshot` frame carried an unusable document
    #[error("Malformed config_snapshot (version '{version}'): {reason}")]
    MalformedSnapshot { version: String, reason: String },
}
