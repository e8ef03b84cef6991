//! cellgate - cell-routing ingress data plane
//!
//! A streaming reverse proxy that maps each request to a cell (placement),
//! applies per-placement admission control, circuit breaking, and
//! health-based failover, and keeps routing from a hot-reloaded,
//! last-known-good configuration snapshot.

pub mod admission;
pub mod circuit;
pub mod cli;
pub mod config;
pub mod control_plane;
pub mod health;
pub mod http_server;
pub mod observability;
pub mod proxy;
pub mod routing;
