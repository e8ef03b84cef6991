//! # Circuit Breaker Set
//!
//! Per-placement breakers keyed by placement key. Each breaker is mutated
//! under its own map entry lock; there is no global lock on the request
//! path. Placements without a circuit breaker policy have no entry: they
//! are always allowed and report closed.

use std::time::Instant;

use dashmap::DashMap;

use super::breaker::{CircuitBreaker, CircuitState};
use crate::config::Snapshot;
use crate::observability::Logger;

/// Circuit decisions and outcome recording, as seen by the request path.
pub trait CircuitGuard: Send + Sync {
    /// May a request to this placement proceed right now?
    fn allow(&self, pk: &str) -> bool;
    /// Record a successful outcome for this placement.
    fn record_success(&self, pk: &str);
    /// Record a failed outcome for this placement.
    fn record_failure(&self, pk: &str);
    /// The placement's current breaker state.
    fn state(&self, pk: &str) -> CircuitState;
}

/// The production breaker set.
#[derive(Default)]
pub struct CircuitBreakerSet {
    breakers: DashMap<String, CircuitBreaker>,
}

impl CircuitBreakerSet {
    /// Create an empty set; populate it with `apply_snapshot`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile breakers against a snapshot's membership.
    ///
    /// Surviving placements keep their state (policy updates take effect in
    /// place), new placements with a policy start closed, and placements no
    /// longer in the snapshot are dropped.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) {
        for (pk, placement) in &snapshot.placements {
            match &placement.circuit_breaker {
                Some(policy) => match self.breakers.get_mut(pk) {
                    Some(mut breaker) => breaker.set_policy(*policy),
                    None => {
                        self.breakers
                            .insert(pk.clone(), CircuitBreaker::new(*policy));
                    }
                },
                None => {
                    self.breakers.remove(pk);
                }
            }
        }
        self.breakers
            .retain(|pk, _| snapshot.placements.contains_key(pk));
    }

    fn log_transition(pk: &str, before: CircuitState, after: CircuitState) {
        if before != after {
            Logger::warn(
                "CIRCUIT_STATE_CHANGED",
                &[
                    ("placement", pk),
                    ("from", before.as_str()),
                    ("to", after.as_str()),
                ],
            );
        }
    }
}

impl CircuitGuard for CircuitBreakerSet {
    fn allow(&self, pk: &str) -> bool {
        match self.breakers.get_mut(pk) {
            Some(mut breaker) => {
                let before = breaker.state();
                let allowed = breaker.allow_at(Instant::now());
                Self::log_transition(pk, before, breaker.state());
                allowed
            }
            None => true,
        }
    }

    fn record_success(&self, pk: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(pk) {
            let before = breaker.state();
            breaker.record_success();
            Self::log_transition(pk, before, breaker.state());
        }
    }

    fn record_failure(&self, pk: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(pk) {
            let before = breaker.state();
            breaker.record_failure_at(Instant::now());
            Self::log_transition(pk, before, breaker.state());
        }
    }

    fn state(&self, pk: &str) -> CircuitState {
        match self.breakers.get(pk) {
            Some(breaker) => breaker.state(),
            None => CircuitState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{validator, ConfigDocument, ConfigSource};
    use chrono::Utc;

    fn snapshot(json: &str) -> Snapshot {
        let document = ConfigDocument::from_json(json).unwrap();
        validator::validate(&document, ConfigSource::File, Utc::now()).unwrap()
    }

    fn snapshot_with_breaker(version: &str, threshold: u32) -> Snapshot {
        snapshot(&format!(
            r#"{{
                "version": "{version}",
                "routingTable": {{}},
                "placements": {{
                    "visa": {{
                        "url": "http://u-visa",
                        "circuit_breaker": {{"failure_threshold": {threshold}, "timeout": "30s"}}
                    }},
                    "tier3": {{"url": "http://u-t3"}}
                }},
                "defaultPlacement": "tier3"
            }}"#
        ))
    }

    #[test]
    fn test_placement_without_policy_is_always_allowed() {
        let set = CircuitBreakerSet::new();
        set.apply_snapshot(&snapshot_with_breaker("1", 1));

        for _ in 0..8 {
            set.record_failure("tier3");
            assert!(set.allow("tier3"));
        }
        assert_eq!(set.state("tier3"), CircuitState::Closed);
    }

    #[test]
    fn test_trips_on_threshold() {
        let set = CircuitBreakerSet::new();
        set.apply_snapshot(&snapshot_with_breaker("1", 3));

        for _ in 0..3 {
            assert!(set.allow("visa"));
            set.record_failure("visa");
        }
        assert_eq!(set.state("visa"), CircuitState::Open);
        assert!(!set.allow("visa"));
    }

    #[test]
    fn test_replacement_preserves_surviving_state() {
        let set = CircuitBreakerSet::new();
        set.apply_snapshot(&snapshot_with_breaker("1", 1));

        set.record_failure("visa");
        assert_eq!(set.state("visa"), CircuitState::Open);

        // Same placement in the next snapshot: state survives
        set.apply_snapshot(&snapshot_with_breaker("2", 1));
        assert_eq!(set.state("visa"), CircuitState::Open);
    }

    #[test]
    fn test_replacement_drops_retired_placements() {
        let set = CircuitBreakerSet::new();
        set.apply_snapshot(&snapshot_with_breaker("1", 1));
        set.record_failure("visa");
        assert_eq!(set.state("visa"), CircuitState::Open);

        let without_visa = snapshot(
            r#"{
                "version": "2",
                "routingTable": {},
                "placements": {"tier3": {"url": "http://u-t3"}},
                "defaultPlacement": "tier3"
            }"#,
        );
        set.apply_snapshot(&without_visa);

        // A reintroduced placement starts fresh and closed
        set.apply_snapshot(&snapshot_with_breaker("3", 1));
        assert_eq!(set.state("visa"), CircuitState::Closed);
        assert!(set.allow("visa"));
    }

    #[test]
    fn test_removing_policy_removes_breaker() {
        let set = CircuitBreakerSet::new();
        set.apply_snapshot(&snapshot_with_breaker("1", 1));
        set.record_failure("visa");
        assert_eq!(set.state("visa"), CircuitState::Open);

        let no_policy = snapshot(
            r#"{
                "version": "2",
                "routingTable": {},
                "placements": {
                    "visa": {"url": "http://u-visa"},
                    "tier3": {"url": "http://u-t3"}
                },
                "defaultPlacement": "tier3"
            }"#,
        );
        set.apply_snapshot(&no_policy);
        assert!(set.allow("visa"));
        assert_eq!(set.state("visa"), CircuitState::Closed);
    }
}
