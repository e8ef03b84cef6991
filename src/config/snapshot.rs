//! # Configuration Snapshot
//!
//! The validated, immutable view of routing configuration. Snapshots are
//! created only by the validator, published whole by the store, and shared
//! read-only by every request handler. Replacement is by whole-object
//! substitution; a snapshot is never mutated after publication.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

/// Provenance of a published snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from the watched local file
    File,
    /// Pushed by the control plane
    ControlPlane,
}

impl ConfigSource {
    /// Returns the string representation used in logs and the debug surface
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::File => "file",
            ConfigSource::ControlPlane => "control_plane",
        }
    }
}

/// Active health checking policy for one placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckPolicy {
    /// Probe path, appended to the endpoint URL
    pub path: String,
    /// Time between probes
    pub interval: Duration,
    /// Per-probe timeout
    pub timeout: Duration,
}

/// Circuit breaker policy for one placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerPolicy {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing
    pub timeout: Duration,
}

/// A validated placement descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// Upstream endpoint
    pub url: Url,
    /// Placement to divert to when this one is open or unhealthy
    pub fallback: Option<String>,
    /// Active health checking, if configured
    pub health_check: Option<HealthCheckPolicy>,
    /// Circuit breaking, if configured
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
    /// Concurrent in-flight cap; `None` means unlimited (never `Some(0)`)
    pub concurrency_limit: Option<u32>,
    /// Body size cap in bytes; `None` means unlimited (never `Some(0)`)
    pub max_request_body_bytes: Option<u64>,
}

/// The placement keys treated as shared tiers when no `tiers` array is
/// present in the document.
pub const DEFAULT_TIER_SET: [&str; 3] = ["tier1", "tier2", "tier3"];

/// An immutable, validated configuration snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Opaque version tag, non-empty
    pub version: String,
    /// Routing key -> placement key
    pub routing_table: HashMap<String, String>,
    /// Placement key -> descriptor; closed under routing table, default
    /// placement, and fallbacks
    pub placements: HashMap<String, Placement>,
    /// Placement used when the routing key is unknown
    pub default_placement: String,
    /// Placement keys considered shared tiers
    pub tier_set: HashSet<String>,
    /// Where this snapshot came from
    pub source: ConfigSource,
    /// When the store admitted this snapshot
    pub admitted_at: DateTime<Utc>,
}

impl Snapshot {
    /// Look up a placement descriptor by key.
    pub fn placement(&self, pk: &str) -> Option<&Placement> {
        self.placements.get(pk)
    }

    /// The default tier set, used when the document names none.
    pub fn default_tier_set() -> HashSet<String> {
        DEFAULT_TIER_SET.iter().map(|s| s.to_string()).collect()
    }
}
