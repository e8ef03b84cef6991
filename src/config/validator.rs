//! # Configuration Validator
//!
//! Turns a parsed document into a validated snapshot, or rejects it with
//! the first failing invariant. Validation is total and side-effect-free:
//! there are no partial successes, and a rejection leaves nothing behind.
//!
//! Placement maps are walked in sorted key order so that the same invalid
//! document always produces the same error.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use url::Url;

use super::document::{ConfigDocument, PlacementDocument};
use super::errors::{ConfigError, ConfigResult};
use super::snapshot::{
    CircuitBreakerPolicy, ConfigSource, HealthCheckPolicy, Placement, Snapshot,
};

/// Validate a candidate document into a snapshot.
pub fn validate(
    document: &ConfigDocument,
    source: ConfigSource,
    admitted_at: DateTime<Utc>,
) -> ConfigResult<Snapshot> {
    if document.version.is_empty() {
        return Err(ConfigError::EmptyVersion);
    }

    let raw_placements = document.effective_placements();
    let mut placements: HashMap<String, Placement> = HashMap::with_capacity(raw_placements.len());

    let mut placement_keys: Vec<&String> = raw_placements.keys().collect();
    placement_keys.sort();

    for pk in placement_keys {
        if pk.is_empty() {
            return Err(ConfigError::EmptyPlacementKey);
        }
        let descriptor = &raw_placements[pk];
        placements.insert(pk.clone(), validate_placement(pk, descriptor)?);
    }

    let mut routing_keys: Vec<&String> = document.routing_table.keys().collect();
    routing_keys.sort();

    for rk in routing_keys {
        if rk.is_empty() {
            return Err(ConfigError::EmptyRoutingKey);
        }
        let target = &document.routing_table[rk];
        if !placements.contains_key(target) {
            return Err(ConfigError::UnknownRoutedPlacement {
                routing_key: rk.clone(),
                placement: target.clone(),
            });
        }
    }

    if !placements.contains_key(&document.default_placement) {
        return Err(ConfigError::UnknownDefaultPlacement(
            document.default_placement.clone(),
        ));
    }

    let mut fallback_owners: Vec<String> = placements.keys().cloned().collect();
    fallback_owners.sort();

    for pk in &fallback_owners {
        if let Some(fallback) = &placements[pk].fallback {
            if !placements.contains_key(fallback) {
                return Err(ConfigError::UnknownFallback {
                    placement: pk.clone(),
                    fallback: fallback.clone(),
                });
            }
        }
    }

    let tier_set = match &document.tiers {
        Some(tiers) => tiers.iter().cloned().collect(),
        None => Snapshot::default_tier_set(),
    };

    Ok(Snapshot {
        version: document.version.clone(),
        routing_table: document.routing_table.clone(),
        placements,
        default_placement: document.default_placement.clone(),
        tier_set,
        source,
        admitted_at,
    })
}

fn validate_placement(pk: &str, descriptor: &PlacementDocument) -> ConfigResult<Placement> {
    let url = parse_endpoint_url(pk, &descriptor.url)?;

    let health_check = match &descriptor.health_check {
        Some(hc) => {
            if !hc.path.starts_with('/') {
                return Err(ConfigError::InvalidHealthPath {
                    placement: pk.to_string(),
                    path: hc.path.clone(),
                });
            }
            if hc.interval.is_zero() {
                return Err(ConfigError::NonPositiveDuration {
                    placement: pk.to_string(),
                    field: "health_check.interval",
                });
            }
            if hc.timeout.is_zero() {
                return Err(ConfigError::NonPositiveDuration {
                    placement: pk.to_string(),
                    field: "health_check.timeout",
                });
            }
            Some(HealthCheckPolicy {
                path: hc.path.clone(),
                interval: hc.interval,
                timeout: hc.timeout,
            })
        }
        None => None,
    };

    let circuit_breaker = match &descriptor.circuit_breaker {
        Some(cb) => {
            if cb.failure_threshold == 0 {
                return Err(ConfigError::ZeroFailureThreshold {
                    placement: pk.to_string(),
                });
            }
            if cb.timeout.is_zero() {
                return Err(ConfigError::NonPositiveDuration {
                    placement: pk.to_string(),
                    field: "circuit_breaker.timeout",
                });
            }
            Some(CircuitBreakerPolicy {
                failure_threshold: cb.failure_threshold,
                timeout: cb.timeout,
            })
        }
        None => None,
    };

    Ok(Placement {
        url,
        fallback: descriptor.fallback.clone(),
        health_check,
        circuit_breaker,
        // Zero caps mean unlimited; normalize so consumers never see Some(0)
        concurrency_limit: descriptor.concurrency_limit.filter(|limit| *limit > 0),
        max_request_body_bytes: descriptor.max_request_body_bytes.filter(|cap| *cap > 0),
    })
}

fn parse_endpoint_url(pk: &str, raw: &str) -> ConfigResult<Url> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidEndpointUrl {
        placement: pk.to_string(),
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::InvalidEndpointUrl {
                placement: pk.to_string(),
                url: raw.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            });
        }
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidEndpointUrl {
            placement: pk.to_string(),
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}
