//! # Proxy Errors
//!
//! The request-path error taxonomy. Each variant resolves the request with
//! a specific status code; nothing is logged-and-rethrown.

use axum::http::StatusCode;
use thiserror::Error;

use crate::routing::ResolveError;

/// Request-path errors
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The required routing key header is absent or empty
    #[error("Missing or empty X-Routing-Key header")]
    MissingRoutingKey,

    /// The request body exceeds the placement's cap
    #[error("Request body exceeds the limit for placement '{placement}'")]
    PayloadTooLarge { placement: String },

    /// The placement's concurrency limit is reached
    #[error("Concurrency limit reached for placement '{0}'")]
    LoadShed(String),

    /// The snapshot broke an invariant; cannot occur after validation
    #[error(transparent)]
    Internal(#[from] ResolveError),

    /// The upstream could not be reached
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// The circuit is open and the placement has no fallback
    #[error("Circuit open for placement '{0}'")]
    CircuitOpen(String),

    /// The upstream did not produce response headers in time
    #[error("Upstream response header deadline exceeded")]
    HeaderTimeout,
}

impl ProxyError {
    /// The HTTP status this error resolves the request with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingRoutingKey => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::LoadShed(_) => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::HeaderTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Machine-readable reason code for response bodies and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ProxyError::MissingRoutingKey => "missing_routing_key",
            ProxyError::PayloadTooLarge { .. } => "body_size_limit",
            ProxyError::LoadShed(_) => "concurrency_limit",
            ProxyError::Internal(_) => "internal_error",
            ProxyError::Transport(_) => "upstream_transport_error",
            ProxyError::CircuitOpen(_) => "circuit_open",
            ProxyError::HeaderTimeout => "upstream_timeout",
        }
    }
}
