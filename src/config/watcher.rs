//! # Config File Watcher
//!
//! Polls the config file on a fixed interval and feeds candidate documents
//! into the store. Change detection is by SHA-256 content digest rather than
//! mtime, so atomic-rename writers and rsync-style deployers are handled the
//! same way. Read, parse, and validation failures leave the active snapshot
//! in place; a file that disappears after startup is an error, not a crash.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use super::document::ConfigDocument;
use super::snapshot::ConfigSource;
use super::store::ConfigStore;
use crate::observability::Logger;

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// SHA-256 digest of the file content.
pub type ContentDigest = [u8; 32];

/// Compute the content digest used for change detection.
pub fn content_digest(bytes: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Watches one config file and replaces the store's snapshot on change.
pub struct FileWatcher {
    path: PathBuf,
    poll_interval: Duration,
    store: Arc<ConfigStore>,
    last_digest: Option<ContentDigest>,
}

impl FileWatcher {
    /// Create a watcher. `seed_digest` is the digest of the content already
    /// loaded at bootstrap, so the first poll does not re-apply it.
    pub fn new(path: PathBuf, store: Arc<ConfigStore>, seed_digest: Option<ContentDigest>) -> Self {
        Self {
            path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            store,
            last_digest: seed_digest,
        }
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let path = self.path.display().to_string();
        Logger::info(
            "CONFIG_WATCH_STARTED",
            &[
                ("path", &path),
                ("poll_interval_ms", &self.poll_interval.as_millis().to_string()),
            ],
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the seed digest
        // governs until the interval elapses once.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    Logger::info("CONFIG_WATCH_STOPPED", &[("path", &path)]);
                    break;
                }
            }
        }
    }

    /// One poll: read, digest, and (on change) parse and replace.
    pub(crate) async fn poll_once(&mut self) {
        let path = self.path.display().to_string();

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                Logger::error(
                    "CONFIG_READ_FAILED",
                    &[("path", &path), ("error", &e.to_string())],
                );
                return;
            }
        };

        let digest = content_digest(&bytes);
        if self.last_digest == Some(digest) {
            return;
        }
        // Remember this content even if it fails below: a partial write will
        // produce a new digest once the writer finishes.
        self.last_digest = Some(digest);

        let document = match ConfigDocument::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                Logger::error(
                    "CONFIG_PARSE_FAILED",
                    &[("path", &path), ("error", &e.to_string())],
                );
                return;
            }
        };

        match self.store.try_replace(&document, ConfigSource::File) {
            Ok(event) => {
                Logger::info(
                    "CONFIG_RELOADED",
                    &[
                        ("path", &path),
                        ("old_version", &event.old_version),
                        ("new_version", &event.new_version),
                    ],
                );
            }
            Err(e) => {
                Logger::error(
                    "CONFIG_REJECTED",
                    &[
                        ("path", &path),
                        ("version", &document.version),
                        ("error", &e.to_string()),
                    ],
                );
            }
        }
    }
}
