//! # Health Monitor
//!
//! One cooperative probe task per placement that configures a health check.
//! A probe GETs the endpoint's check path on the configured interval; a 2xx
//! reply is healthy, anything else (non-2xx, connect error, timeout) is
//! unhealthy. State flips are logged edge-triggered; the last-check
//! timestamp always advances.
//!
//! Placements without a health check block are considered healthy forever.
//! On snapshot replacement, new placements start healthy (fail-open),
//! retired placements are dropped, and changed probe parameters restart the
//! probe task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::snapshot::HealthCheckPolicy;
use crate::config::Snapshot;
use crate::observability::Logger;

/// Health of one placement's endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// The last probe succeeded, or the placement has no health check
    Healthy,
    /// The last probe failed
    Unhealthy,
}

impl HealthState {
    /// Returns the string representation used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

/// Health state lookups, as seen by the request path.
pub trait HealthView: Send + Sync {
    /// The placement's current health. Unknown placements are healthy.
    fn state(&self, pk: &str) -> HealthState;
}

#[derive(Debug, Clone, Copy)]
struct EndpointHealth {
    state: HealthState,
    last_check: Option<DateTime<Utc>>,
}

struct ProbeTask {
    policy: HealthCheckPolicy,
    endpoint: Url,
    handle: JoinHandle<()>,
}

/// The production health monitor.
pub struct HealthMonitor {
    client: reqwest::Client,
    states: Arc<DashMap<String, EndpointHealth>>,
    probes: Mutex<HashMap<String, ProbeTask>>,
}

impl HealthMonitor {
    /// Create a monitor probing through the given client.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            states: Arc::new(DashMap::new()),
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile probe tasks against a snapshot's membership.
    ///
    /// Must be called from within a tokio runtime; probe tasks are spawned
    /// here and aborted when their placement retires or its parameters
    /// change.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) {
        let mut probes = match self.probes.lock() {
            Ok(probes) => probes,
            Err(poisoned) => poisoned.into_inner(),
        };

        for (pk, placement) in &snapshot.placements {
            match &placement.health_check {
                Some(policy) => {
                    let unchanged = probes.get(pk).is_some_and(|probe| {
                        probe.policy == *policy && probe.endpoint == placement.url
                    });
                    if unchanged {
                        continue;
                    }
                    if let Some(previous) = probes.remove(pk) {
                        previous.handle.abort();
                    }
                    // Fail-open: a placement is healthy until a probe says otherwise
                    self.states.entry(pk.clone()).or_insert(EndpointHealth {
                        state: HealthState::Healthy,
                        last_check: None,
                    });
                    let handle = tokio::spawn(probe_loop(
                        self.client.clone(),
                        pk.clone(),
                        placement.url.clone(),
                        policy.clone(),
                        Arc::clone(&self.states),
                    ));
                    probes.insert(
                        pk.clone(),
                        ProbeTask {
                            policy: policy.clone(),
                            endpoint: placement.url.clone(),
                            handle,
                        },
                    );
                }
                None => {
                    if let Some(previous) = probes.remove(pk) {
                        previous.handle.abort();
                    }
                    self.states.remove(pk);
                }
            }
        }

        probes.retain(|pk, probe| {
            let keep = snapshot.placements.contains_key(pk);
            if !keep {
                probe.handle.abort();
            }
            keep
        });
        self.states
            .retain(|pk, _| snapshot.placements.contains_key(pk));
    }

    /// Abort every probe task. Called on shutdown.
    pub fn shutdown(&self) {
        let mut probes = match self.probes.lock() {
            Ok(probes) => probes,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, probe) in probes.drain() {
            probe.handle.abort();
        }
    }

    /// When the placement was last probed, if ever.
    pub fn last_check(&self, pk: &str) -> Option<DateTime<Utc>> {
        self.states.get(pk).and_then(|entry| entry.last_check)
    }
}

impl HealthView for HealthMonitor {
    fn state(&self, pk: &str) -> HealthState {
        match self.states.get(pk) {
            Some(entry) => entry.state,
            None => HealthState::Healthy,
        }
    }
}

/// The probe URL is the endpoint with the check path appended.
fn probe_url(endpoint: &Url, path: &str) -> String {
    format!("{}{}", endpoint.as_str().trim_end_matches('/'), path)
}

async fn probe_loop(
    client: reqwest::Client,
    pk: String,
    endpoint: Url,
    policy: HealthCheckPolicy,
    states: Arc<DashMap<String, EndpointHealth>>,
) {
    let target = probe_url(&endpoint, &policy.path);
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let outcome = client
            .get(&target)
            .timeout(policy.timeout)
            .send()
            .await;

        let (healthy, detail) = match &outcome {
            Ok(response) if response.status().is_success() => (true, response.status().to_string()),
            Ok(response) => (false, response.status().to_string()),
            Err(e) => (false, e.to_string()),
        };

        record_probe(&states, &pk, healthy, &detail);
    }
}

fn record_probe(
    states: &DashMap<String, EndpointHealth>,
    pk: &str,
    healthy: bool,
    detail: &str,
) {
    let observed = if healthy {
        HealthState::Healthy
    } else {
        HealthState::Unhealthy
    };

    let mut entry = states.entry(pk.to_string()).or_insert(EndpointHealth {
        state: HealthState::Healthy,
        last_check: None,
    });

    if entry.state != observed {
        Logger::warn(
            "HEALTH_STATE_CHANGED",
            &[
                ("placement", pk),
                ("from", entry.state.as_str()),
                ("to", observed.as_str()),
                ("detail", detail),
            ],
        );
    }
    entry.state = observed;
    entry.last_check = Some(Utc::now());
}
