//! # Control Plane
//!
//! The push channel to the authoritative configuration source: wire
//! protocol types and the resilient WebSocket client.

pub mod client;
pub mod errors;
pub mod protocol;

pub use client::PushClient;
pub use errors::{ControlPlaneError, ControlPlaneResult};
pub use protocol::{DataPlaneMessage, Inbound};
