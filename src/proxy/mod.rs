//! # Proxy
//!
//! The streaming reverse proxy: per-request pipeline, header rewriting,
//! and the request-path error taxonomy.

pub mod engine;
pub mod errors;
pub mod headers;

pub use engine::{FailoverReason, ProxyEngine, ProxyTimeouts};
pub use errors::ProxyError;
