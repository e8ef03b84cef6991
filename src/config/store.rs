//! # Configuration Store
//!
//! Holds the active snapshot behind a lock-free read handle. Readers get an
//! `Arc<Snapshot>` that stays valid for as long as they hold it, even if a
//! writer publishes a replacement mid-request. Writers (the file watcher and
//! the push client) serialize among themselves behind a single mutex;
//! validation runs inside the critical section so that publications are
//! atomic and last-known-good is preserved on rejection.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::broadcast;

use super::document::ConfigDocument;
use super::errors::{ConfigError, ConfigResult};
use super::snapshot::{ConfigSource, Snapshot};
use super::validator;

/// Capacity of the replacement event channel. Reconcilers that fall behind
/// observe a lag and resync from `current()`.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Read access to the active snapshot. The production implementation is
/// [`ConfigStore`]; tests substitute fixed snapshots.
pub trait SnapshotReader: Send + Sync {
    /// Returns the active snapshot. Never blocks; the handle keeps the
    /// snapshot alive for the caller even across a replacement.
    fn current(&self) -> Arc<Snapshot>;
}

/// Emitted on every successful replacement.
#[derive(Debug, Clone)]
pub struct ReplacementEvent {
    /// Version of the snapshot that was replaced
    pub old_version: String,
    /// Version of the snapshot now active
    pub new_version: String,
    /// Provenance of the new snapshot
    pub source: ConfigSource,
    /// The newly published snapshot, for membership reconciliation
    pub snapshot: Arc<Snapshot>,
}

/// The store owning the active snapshot.
pub struct ConfigStore {
    active: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    events: broadcast::Sender<ReplacementEvent>,
}

impl ConfigStore {
    /// Create a store with an already-validated initial snapshot.
    pub fn new(initial: Snapshot) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            active: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
            events,
        }
    }

    /// Returns the active snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.active.load_full()
    }

    /// Validate a candidate document and, if valid, publish it atomically.
    ///
    /// On success the next `current()` call returns the new snapshot while
    /// in-flight readers finish against the old one, and a
    /// [`ReplacementEvent`] is broadcast. On failure the active snapshot is
    /// untouched and the validation error is returned.
    pub fn try_replace(
        &self,
        document: &ConfigDocument,
        source: ConfigSource,
    ) -> ConfigResult<ReplacementEvent> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| ConfigError::Internal("writer lock poisoned".to_string()))?;

        let candidate = validator::validate(document, source, Utc::now())?;
        let old_version = self.active.load().version.clone();

        let published = Arc::new(candidate);
        self.active.store(Arc::clone(&published));

        let event = ReplacementEvent {
            old_version,
            new_version: published.version.clone(),
            source,
            snapshot: published,
        };
        // No receivers is fine; reconcilers subscribe at bootstrap
        let _ = self.events.send(event.clone());

        Ok(event)
    }

    /// Subscribe to replacement events for per-endpoint state reconciliation.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplacementEvent> {
        self.events.subscribe()
    }
}

impl SnapshotReader for ConfigStore {
    fn current(&self) -> Arc<Snapshot> {
        ConfigStore::current(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(version: &str, default_url: &str) -> ConfigDocument {
        ConfigDocument::from_json(&format!(
            r#"{{
                "version": "{version}",
                "routingTable": {{}},
                "cellEndpoints": {{"tier3": "{default_url}"}},
                "defaultPlacement": "tier3"
            }}"#
        ))
        .unwrap()
    }

    fn store_with(version: &str) -> ConfigStore {
        let doc = document(version, "http://u-t3");
        let snapshot =
            validator::validate(&doc, ConfigSource::File, Utc::now()).unwrap();
        ConfigStore::new(snapshot)
    }

    #[test]
    fn test_current_returns_active_snapshot() {
        let store = store_with("1");
        assert_eq!(store.current().version, "1");
    }

    #[test]
    fn test_replace_publishes_new_version() {
        let store = store_with("1");
        let event = store
            .try_replace(&document("2", "http://u-t3"), ConfigSource::ControlPlane)
            .unwrap();

        assert_eq!(event.old_version, "1");
        assert_eq!(event.new_version, "2");
        assert_eq!(event.source, ConfigSource::ControlPlane);
        assert_eq!(store.current().version, "2");
        assert_eq!(store.current().source, ConfigSource::ControlPlane);
    }

    #[test]
    fn test_failed_replace_keeps_old_snapshot() {
        let store = store_with("1");
        let bad = ConfigDocument::from_json(
            r#"{
                "version": "2",
                "routingTable": {"a": "ghost"},
                "placements": {"tier3": {"url": "http://u-t3"}},
                "defaultPlacement": "tier3"
            }"#,
        )
        .unwrap();

        let err = store.try_replace(&bad, ConfigSource::File).unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert_eq!(store.current().version, "1");
    }

    #[test]
    fn test_readers_keep_old_snapshot_across_replace() {
        let store = store_with("1");
        let held = store.current();

        store
            .try_replace(&document("2", "http://u-t3"), ConfigSource::File)
            .unwrap();

        assert_eq!(held.version, "1");
        assert_eq!(store.current().version, "2");
    }

    #[test]
    fn test_subscribe_receives_replacement_events() {
        let store = store_with("1");
        let mut events = store.subscribe();

        store
            .try_replace(&document("2", "http://u-t3"), ConfigSource::File)
            .unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.old_version, "1");
        assert_eq!(event.new_version, "2");
        assert_eq!(event.snapshot.version, "2");
    }

    #[test]
    fn test_reapplying_same_version_is_idempotent() {
        let store = store_with("1");
        let before = store.current();

        store
            .try_replace(&document("1", "http://u-t3"), ConfigSource::File)
            .unwrap();

        let after = store.current();
        assert_eq!(after.version, before.version);
        assert_eq!(after.routing_table, before.routing_table);
        assert_eq!(after.placements, before.placements);
        // admitted_at moves forward; everything observable by routing is unchanged
        assert!(after.admitted_at >= before.admitted_at);
    }

    #[test]
    fn test_last_successful_candidate_wins() {
        let store = store_with("1");
        for version in ["2", "3", "4"] {
            store
                .try_replace(&document(version, "http://u-t3"), ConfigSource::File)
                .unwrap();
        }
        assert_eq!(store.current().version, "4");
    }
}
