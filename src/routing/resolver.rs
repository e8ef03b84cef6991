//! # Routing Resolver
//!
//! Pure, synchronous resolution of a routing key against one snapshot.
//! The resolver is the only producer of the route reason surfaced in logs
//! and response headers.

use thiserror::Error;
use url::Url;

use crate::config::Snapshot;

/// Why a request landed on its placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// The routing key mapped to a non-tier placement
    Dedicated,
    /// The routing key mapped to a shared tier
    Tier,
    /// The routing key was absent or unknown
    Default,
}

impl RouteReason {
    /// Returns the string representation used in logs and headers
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::Dedicated => "dedicated",
            RouteReason::Tier => "tier",
            RouteReason::Default => "default",
        }
    }
}

/// A successful routing decision
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    /// The chosen placement key
    pub placement: String,
    /// The placement's endpoint URL
    pub endpoint: Url,
    /// Why this placement was chosen
    pub reason: RouteReason,
}

/// Resolution failures. Cannot occur against a validated snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// A placement referenced by the snapshot is missing from it
    #[error("Placement '{0}' is missing from the snapshot")]
    MissingPlacement(String),
}

/// Resolve a routing key to a placement and endpoint.
///
/// An empty or unknown key resolves to the default placement with reason
/// `default`. A known key resolves to its mapped placement with reason
/// `tier` when the placement is in the snapshot's tier set, `dedicated`
/// otherwise.
pub fn resolve(routing_key: &str, snapshot: &Snapshot) -> Result<RouteDecision, ResolveError> {
    let (placement, reason) = match snapshot.routing_table.get(routing_key) {
        Some(pk) if !routing_key.is_empty() => {
            let reason = if snapshot.tier_set.contains(pk) {
                RouteReason::Tier
            } else {
                RouteReason::Dedicated
            };
            (pk.clone(), reason)
        }
        _ => (snapshot.default_placement.clone(), RouteReason::Default),
    };

    let descriptor = snapshot
        .placement(&placement)
        .ok_or_else(|| ResolveError::MissingPlacement(placement.clone()))?;

    Ok(RouteDecision {
        placement,
        endpoint: descriptor.url.clone(),
        reason,
    })
}
