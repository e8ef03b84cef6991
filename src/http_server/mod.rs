//! # HTTP Server
//!
//! The inbound listener combining the debug surface and the catch-all
//! proxy route.

pub mod config;
pub mod debug_routes;
pub mod server;

pub use config::ServerConfig;
pub use server::{AppState, HttpServer};
