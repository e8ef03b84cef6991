//! # Health Monitoring
//!
//! Active per-placement health probes and the health view consulted by the
//! request path.

pub mod monitor;

pub use monitor::{HealthMonitor, HealthState, HealthView};
