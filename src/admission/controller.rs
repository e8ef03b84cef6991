//! # Admission Controller
//!
//! Per-placement concurrency slots and request-body size caps. Slots are
//! counting semaphores; `try_acquire` never blocks, and the returned permit
//! releases its slot when dropped, so every exit path (normal, error,
//! cancellation, panic unwind) gives the slot back exactly once.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Snapshot;

/// Outcome of a non-blocking slot acquisition.
#[derive(Debug)]
pub enum AdmissionOutcome {
    /// The request may proceed; drop the permit to release the slot
    Admitted(AdmissionPermit),
    /// The placement's concurrency limit is reached
    Rejected,
}

impl AdmissionOutcome {
    /// True when the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionOutcome::Admitted(_))
    }
}

/// RAII handle for one admitted request. Placements without a limit get an
/// empty permit.
#[derive(Debug)]
pub struct AdmissionPermit {
    _slot: Option<OwnedSemaphorePermit>,
}

impl AdmissionPermit {
    fn unlimited() -> Self {
        Self { _slot: None }
    }

    fn limited(slot: OwnedSemaphorePermit) -> Self {
        Self { _slot: Some(slot) }
    }
}

/// Admission decisions, as seen by the request path.
pub trait Admission: Send + Sync {
    /// Non-blocking attempt to take a slot for this placement.
    fn try_acquire(&self, pk: &str) -> AdmissionOutcome;
    /// Does a body of `content_length` bytes fit this placement's cap?
    fn check_body_size(&self, pk: &str, content_length: u64) -> bool;
}

#[derive(Debug)]
struct PlacementLimits {
    concurrency: Option<(u32, Arc<Semaphore>)>,
    max_body_bytes: Option<u64>,
}

/// The production admission controller.
#[derive(Debug, Default)]
pub struct AdmissionController {
    limits: DashMap<String, PlacementLimits>,
}

impl AdmissionController {
    /// Create an empty controller; populate it with `apply_snapshot`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile limits against a snapshot's membership.
    ///
    /// A placement whose concurrency limit is unchanged keeps its semaphore
    /// (and therefore its in-flight accounting); a changed limit gets a
    /// fresh semaphore, and in-flight permits from the old one drain
    /// against it harmlessly. Retired placements are dropped.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) {
        for (pk, placement) in &snapshot.placements {
            if placement.concurrency_limit.is_none() && placement.max_request_body_bytes.is_none()
            {
                self.limits.remove(pk);
                continue;
            }

            let concurrency = placement.concurrency_limit.map(|limit| {
                let existing = self.limits.get(pk).and_then(|entry| {
                    entry
                        .concurrency
                        .as_ref()
                        .filter(|(capacity, _)| *capacity == limit)
                        .map(|(capacity, semaphore)| (*capacity, Arc::clone(semaphore)))
                });
                existing.unwrap_or_else(|| (limit, Arc::new(Semaphore::new(limit as usize))))
            });

            self.limits.insert(
                pk.clone(),
                PlacementLimits {
                    concurrency,
                    max_body_bytes: placement.max_request_body_bytes,
                },
            );
        }
        self.limits
            .retain(|pk, _| snapshot.placements.contains_key(pk));
    }
}

impl Admission for AdmissionController {
    fn try_acquire(&self, pk: &str) -> AdmissionOutcome {
        let semaphore = match self.limits.get(pk) {
            Some(entry) => match &entry.concurrency {
                Some((_, semaphore)) => Arc::clone(semaphore),
                None => return AdmissionOutcome::Admitted(AdmissionPermit::unlimited()),
            },
            None => return AdmissionOutcome::Admitted(AdmissionPermit::unlimited()),
        };

        match semaphore.try_acquire_owned() {
            Ok(slot) => AdmissionOutcome::Admitted(AdmissionPermit::limited(slot)),
            Err(_) => AdmissionOutcome::Rejected,
        }
    }

    fn check_body_size(&self, pk: &str, content_length: u64) -> bool {
        match self.limits.get(pk).and_then(|entry| entry.max_body_bytes) {
            Some(cap) => content_length <= cap,
            None => true,
        }
    }
}
