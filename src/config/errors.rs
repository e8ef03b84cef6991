//! # Configuration Errors
//!
//! Error types for parsing and validating configuration candidates. A
//! rejected candidate names the first failing invariant with enough detail
//! to reproduce; the previously active snapshot is never touched.

use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    // ==================
    // Document Errors
    // ==================
    /// Failed to read the config source
    #[error("Failed to read config: {0}")]
    Io(String),

    /// Document is not valid JSON or has the wrong shape
    #[error("Invalid config JSON: {0}")]
    Parse(String),

    // ==================
    // Invariant Violations
    // ==================
    /// Version must be a non-empty string
    #[error("Config version must be non-empty")]
    EmptyVersion,

    /// Routing keys must be non-empty strings
    #[error("Routing table contains an empty routing key")]
    EmptyRoutingKey,

    /// Placement keys must be non-empty strings
    #[error("Placement map contains an empty placement key")]
    EmptyPlacementKey,

    /// A routing table entry points at a placement that does not exist
    #[error("Routing key '{routing_key}' maps to unknown placement '{placement}'")]
    UnknownRoutedPlacement {
        routing_key: String,
        placement: String,
    },

    /// The default placement does not exist
    #[error("Default placement '{0}' is not defined")]
    UnknownDefaultPlacement(String),

    /// A fallback points at a placement that does not exist
    #[error("Placement '{placement}' falls back to unknown placement '{fallback}'")]
    UnknownFallback { placement: String, fallback: String },

    /// An endpoint URL is not an absolute http/https URL with a host
    #[error("Placement '{placement}' has invalid endpoint URL '{url}': {reason}")]
    InvalidEndpointUrl {
        placement: String,
        url: String,
        reason: String,
    },

    /// A health check or circuit breaker duration is zero
    #[error("Placement '{placement}': {field} must be positive")]
    NonPositiveDuration {
        placement: String,
        field: &'static str,
    },

    /// A health check path does not start with '/'
    #[error("Placement '{placement}': health check path '{path}' must start with '/'")]
    InvalidHealthPath { placement: String, path: String },

    /// A circuit breaker threshold is zero
    #[error("Placement '{placement}': failure_threshold must be greater than zero")]
    ZeroFailureThreshold { placement: String },

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
