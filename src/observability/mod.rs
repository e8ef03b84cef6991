//! # Observability
//!
//! Structured JSON logging and per-request completion records.

pub mod logger;
pub mod record;

pub use logger::{Logger, Severity};
pub use record::RequestRecord;
