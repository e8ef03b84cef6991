//! # Configuration Document
//!
//! Serde model of the on-disk JSON configuration. Two shapes are accepted,
//! selected by the fields present:
//!
//! - Legacy: `{version, routingTable, cellEndpoints, defaultPlacement}`
//!   where `cellEndpoints` maps placement keys to bare URLs. Placement
//!   descriptors are synthesized with `url` only.
//! - Extended: `{version, routingTable, placements, defaultPlacement}`
//!   where `placements` maps placement keys to full descriptors.
//!
//! When both `cellEndpoints` and `placements` are present, `placements`
//! wins. Duration fields are human-readable strings (`"10s"`, `"500ms"`).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ConfigError, ConfigResult};

/// Top-level configuration document. Field names are camelCase on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Opaque, non-empty version tag
    pub version: String,

    /// Routing key -> placement key
    #[serde(default)]
    pub routing_table: HashMap<String, String>,

    /// Legacy shape: placement key -> bare endpoint URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_endpoints: Option<HashMap<String, String>>,

    /// Extended shape: placement key -> full descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placements: Option<HashMap<String, PlacementDocument>>,

    /// Placement used when the routing key is unknown
    pub default_placement: String,

    /// Placement keys considered shared tiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<String>>,
}

/// Per-placement descriptor. Field names are snake_case on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementDocument {
    /// Absolute http/https endpoint URL
    pub url: String,

    /// Placement to divert to when this one is open or unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,

    /// Active health checking parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckDocument>,

    /// Circuit breaker parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerDocument>,

    /// Concurrent in-flight request cap; 0 or absent means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<u32>,

    /// Request body size cap in bytes; 0 or absent means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_body_bytes: Option<u64>,
}

impl PlacementDocument {
    /// Synthesize a descriptor from a bare URL (legacy shape).
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fallback: None,
            health_check: None,
            circuit_breaker: None,
            concurrency_limit: None,
            max_request_body_bytes: None,
        }
    }
}

/// Active health checking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckDocument {
    /// Probe path, appended to the endpoint URL
    pub path: String,

    /// Time between probes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Per-probe timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Circuit breaker parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerDocument {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl ConfigDocument {
    /// Parse a document from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> ConfigResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a document from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Effective placement descriptors: `placements` wins over the legacy
    /// `cellEndpoints` map when both are present.
    pub fn effective_placements(&self) -> HashMap<String, PlacementDocument> {
        if let Some(placements) = &self.placements {
            return placements.clone();
        }
        match &self.cell_endpoints {
            Some(endpoints) => endpoints
                .iter()
                .map(|(pk, url)| (pk.clone(), PlacementDocument::from_url(url.clone())))
                .collect(),
            None => HashMap::new(),
        }
    }
}
