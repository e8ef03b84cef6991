//! # Configuration
//!
//! Document parsing, validation, the atomic snapshot store, and the file
//! watcher. Candidates from the watcher and the control-plane push client
//! both flow through [`store::ConfigStore::try_replace`]; a candidate either
//! validates completely and is published atomically, or is rejected and the
//! last-known-good snapshot stays active.

pub mod document;
pub mod errors;
pub mod snapshot;
pub mod store;
pub mod validator;
pub mod watcher;

pub use document::ConfigDocument;
pub use errors::{ConfigError, ConfigResult};
pub use snapshot::{ConfigSource, Placement, Snapshot};
pub use store::{ConfigStore, ReplacementEvent, SnapshotReader};
pub use watcher::FileWatcher;
