//! # Admission Control
//!
//! Per-placement concurrency slots and request-body size caps.

pub mod controller;

pub use controller::{Admission, AdmissionController, AdmissionOutcome, AdmissionPermit};
