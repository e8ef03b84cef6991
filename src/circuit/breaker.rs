//! # Circuit Breaker State Machine
//!
//! One closed/open/half-open machine per placement. The machine itself is
//! synchronous and clock-parameterized; callers pass `Instant::now()` so
//! tests can drive time explicitly.
//!
//! Transitions: closed -> open on reaching the failure threshold; open ->
//! half-open when the open window elapses (the transitioning `allow` call
//! is the single probe); half-open -> closed on probe success, half-open ->
//! open on probe failure. There is no closed -> half-open or open -> closed
//! shortcut.

use std::time::Instant;

use crate::config::snapshot::CircuitBreakerPolicy;

/// Externally observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests proceed
    Closed,
    /// Requests are rejected until the open window elapses
    Open,
    /// One probe is allowed through
    HalfOpen,
}

impl CircuitState {
    /// Returns the string representation used in headers and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { consecutive_failures: u32 },
    Open { open_until: Instant },
    HalfOpen,
}

/// A per-placement breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: CircuitBreakerPolicy,
    phase: Phase,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given policy.
    pub fn new(policy: CircuitBreakerPolicy) -> Self {
        Self {
            policy,
            phase: Phase::Closed {
                consecutive_failures: 0,
            },
        }
    }

    /// The policy this breaker runs under.
    pub fn policy(&self) -> CircuitBreakerPolicy {
        self.policy
    }

    /// Replace the policy, keeping the current phase.
    pub fn set_policy(&mut self, policy: CircuitBreakerPolicy) {
        self.policy = policy;
    }

    /// May a request proceed at `now`?
    ///
    /// An open breaker whose window has elapsed transitions to half-open
    /// and returns `true` for exactly this call; later calls return `false`
    /// until the probe reports its outcome.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Closed { .. } => true,
            Phase::Open { open_until } => {
                if now >= open_until {
                    self.phase = Phase::HalfOpen;
                    true
                } else {
                    false
                }
            }
            Phase::HalfOpen => false,
        }
    }

    /// Record a successful outcome.
    pub fn record_success(&mut self) {
        self.phase = Phase::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed outcome at `now`.
    pub fn record_failure_at(&mut self, now: Instant) {
        match self.phase {
            Phase::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.policy.failure_threshold {
                    self.phase = Phase::Open {
                        open_until: now + self.policy.timeout,
                    };
                } else {
                    self.phase = Phase::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            Phase::HalfOpen => {
                self.phase = Phase::Open {
                    open_until: now + self.policy.timeout,
                };
            }
            // Stale outcome from a request admitted before the trip
            Phase::Open { .. } => {}
        }
    }

    /// The externally observable state.
    pub fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Consecutive failures observed while closed.
    pub fn consecutive_failures(&self) -> u32 {
        match self.phase {
            Phase::Closed {
                consecutive_failures,
            } => consecutive_failures,
            _ => 0,
        }
    }
}
