//! # Circuit Breaking
//!
//! Per-placement closed/open/half-open state machines and the set that
//! keys them by placement.

pub mod breaker;
pub mod set;

pub use breaker::{CircuitBreaker, CircuitState};
pub use set::{CircuitBreakerSet, CircuitGuard};
