//! Snapshot persistence.
//!
//! Saves the queue and the active match as one JSON document under a single
//! storage key, and restores them across sessions. Durability is best effort:
//! failures are logged and swallowed, and a snapshot that is malformed or
//! stale is discarded rather than partially restored.
//!
//! Stored document:
//!
//! ```json
//! {
//!   "queue": [ { "id": "2", "type": "vs", "players": ["A", "B"], "status": "waiting", "timestamp": "..." } ],
//!   "currentMatch": { "id": "1", "type": "solo", "players": ["Rin"], "status": "playing", "timestamp": "..." },
//!   "timestamp": "2026-10-19T12:00:00Z",
//!   "version": "1.0"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::StorageConfig;
use super::matches::{Match, MatchError};
use super::store::{KeyValueStore, StoreError};

/// Key used to probe whether the backend accepts writes.
const PROBE_KEY: &str = "__storage_test__";

/// Snapshot decoding and validation failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("queued match at index {index} is invalid: {source}")]
    InvalidMatch { index: usize, source: MatchError },

    #[error("current match is invalid: {0}")]
    InvalidCurrent(MatchError),

    #[error("snapshot saved at {saved_at} is older than the freshness window")]
    Stale { saved_at: DateTime<Utc> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A saved snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub queue: Vec<Match>,
    #[serde(default)]
    pub current_match: Option<Match>,
    /// When the snapshot was written
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub version: String,
}

impl Snapshot {
    /// Check every record carries an id, a kind and one or two participants.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for (index, m) in self.queue.iter().enumerate() {
            m.validate_structure()
                .map_err(|source| SnapshotError::InvalidMatch { index, source })?;
        }
        if let Some(current) = &self.current_match {
            current
                .validate_structure()
                .map_err(SnapshotError::InvalidCurrent)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    queue: &'a [Match],
    current_match: Option<&'a Match>,
    timestamp: DateTime<Utc>,
    version: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportRef<'a> {
    queue: &'a [Match],
    current_match: Option<&'a Match>,
    exported_at: DateTime<Utc>,
    version: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Imported {
    queue: Vec<Match>,
    #[serde(default)]
    current_match: Option<Match>,
}

/// Queue and active match recovered from storage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadedQueue {
    pub queue: Vec<Match>,
    pub current: Option<Match>,
}

impl From<Snapshot> for LoadedQueue {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            queue: snapshot.queue,
            current: snapshot.current_match,
        }
    }
}

/// How a save attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Written on the retry after evicting legacy keys
    SavedAfterEviction,
    /// Gave up; nothing was written
    Failed,
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Storage usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub snapshot_bytes: usize,
    pub total_bytes: usize,
    pub key_count: usize,
    pub quota: Option<usize>,
}

/// Reads and writes snapshots through a [`KeyValueStore`].
#[derive(Debug)]
pub struct SnapshotStore<S, C = SystemClock> {
    store: S,
    clock: C,
    config: StorageConfig,
}

impl<S: KeyValueStore> SnapshotStore<S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: KeyValueStore, C: Clock> SnapshotStore<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self::with_config(store, clock, StorageConfig::default())
    }

    pub fn with_config(store: S, clock: C, config: StorageConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Write a snapshot.
    ///
    /// On a quota failure, legacy keys are evicted and the write retried
    /// once. Never fails loudly.
    pub fn save(&mut self, queue: &[Match], current: Option<&Match>) -> SaveOutcome {
        let snapshot = SnapshotRef {
            queue,
            current_match: current,
            timestamp: self.clock.now(),
            version: &self.config.version,
        };
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize snapshot");
                return SaveOutcome::Failed;
            }
        };

        match self.store.set(&self.config.key, &json) {
            Ok(()) => {
                debug!(bytes = json.len(), queue_length = queue.len(), "Snapshot saved");
                SaveOutcome::Saved
            }
            Err(e) if e.is_quota_exceeded() => {
                warn!(error = %e, "Storage full, evicting legacy keys");
                self.clear_legacy_keys();
                match self.store.set(&self.config.key, &json) {
                    Ok(()) => {
                        info!(bytes = json.len(), "Snapshot saved after evicting legacy keys");
                        SaveOutcome::SavedAfterEviction
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to save snapshot even after eviction");
                        SaveOutcome::Failed
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to save snapshot");
                SaveOutcome::Failed
            }
        }
    }

    /// Read and validate the stored snapshot without touching storage.
    ///
    /// `Ok(None)` when nothing is stored.
    pub fn read(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let Some(raw) = self.store.get(&self.config.key)? else {
            return Ok(None);
        };
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        snapshot.validate()?;
        if self.is_too_old(snapshot.timestamp) {
            return Err(SnapshotError::Stale {
                saved_at: snapshot.timestamp,
            });
        }
        Ok(Some(snapshot))
    }

    /// Load the stored snapshot.
    ///
    /// A malformed or stale snapshot is cleared and reported as absent.
    pub fn load(&mut self) -> Option<LoadedQueue> {
        match self.read() {
            Ok(Some(snapshot)) => {
                info!(
                    queue_length = snapshot.queue.len(),
                    has_current = snapshot.current_match.is_some(),
                    "Snapshot loaded"
                );
                Some(snapshot.into())
            }
            Ok(None) => None,
            Err(SnapshotError::Store(e)) => {
                error!(error = %e, "Failed to read snapshot");
                None
            }
            Err(e) => {
                info!(reason = %e, "Discarding saved snapshot");
                self.clear();
                None
            }
        }
    }

    /// Remove the stored snapshot.
    pub fn clear(&mut self) {
        match self.store.remove(&self.config.key) {
            Ok(()) => debug!(key = %self.config.key, "Snapshot cleared"),
            Err(e) => error!(error = %e, "Failed to clear snapshot"),
        }
    }

    /// Remove keys left by older storage layouts. Returns how many existed.
    pub fn clear_legacy_keys(&mut self) -> usize {
        let mut removed = 0;
        for key in &self.config.legacy_keys {
            match self.store.get(key) {
                Ok(Some(_)) => match self.store.remove(key) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(key = %key, error = %e, "Failed to remove legacy key"),
                },
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to read legacy key"),
            }
        }
        debug!(removed, "Legacy keys cleared");
        removed
    }

    /// Pretty-printed export of the given state.
    pub fn export_json(&self, queue: &[Match], current: Option<&Match>) -> Result<String, SnapshotError> {
        let export = ExportRef {
            queue,
            current_match: current,
            exported_at: self.clock.now(),
            version: &self.config.version,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Parse an export. Structure is validated; age is not.
    pub fn import_json(&self, json: &str) -> Result<LoadedQueue, SnapshotError> {
        let imported: Imported = serde_json::from_str(json)?;
        let snapshot = Snapshot {
            queue: imported.queue,
            current_match: imported.current_match,
            timestamp: self.clock.now(),
            version: self.config.version.clone(),
        };
        snapshot.validate()?;
        Ok(snapshot.into())
    }

    /// Copy the stored snapshot to a timestamped backup key.
    pub fn create_backup(&mut self) -> Option<String> {
        let data = match self.store.get(&self.config.key) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "Failed to read snapshot for backup");
                return None;
            }
        };

        let backup_key = format!(
            "{}{}",
            self.config.backup_prefix(),
            self.clock.now().timestamp_millis()
        );
        match self.store.set(&backup_key, &data) {
            Ok(()) => {
                info!(key = %backup_key, "Backup created");
                Some(backup_key)
            }
            Err(e) => {
                error!(error = %e, "Failed to create backup");
                None
            }
        }
    }

    /// Remove backups older than the retention window.
    pub fn cleanup_old_backups(&mut self) -> Vec<String> {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Failed to list keys for backup cleanup");
                return Vec::new();
            }
        };

        let prefix = self.config.backup_prefix();
        let cutoff = (self.clock.now() - self.config.backup_retention()).timestamp_millis();
        let mut removed = Vec::new();

        for key in keys {
            let Some(millis) = key
                .strip_prefix(&prefix)
                .and_then(|suffix| suffix.parse::<i64>().ok())
            else {
                continue;
            };
            if millis >= cutoff {
                continue;
            }
            match self.store.remove(&key) {
                Ok(()) => {
                    info!(key = %key, "Removed old backup");
                    removed.push(key);
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to remove old backup"),
            }
        }
        removed
    }

    pub fn stats(&self) -> StorageStats {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Failed to collect storage stats");
                return StorageStats {
                    quota: self.store.quota(),
                    ..StorageStats::default()
                };
            }
        };

        let size = |key: &str| -> usize {
            self.store
                .get(key)
                .ok()
                .flatten()
                .map_or(0, |v| v.len())
        };

        StorageStats {
            snapshot_bytes: size(self.config.key.as_str()),
            total_bytes: keys.iter().map(|k| size(k.as_str())).sum(),
            key_count: keys.len(),
            quota: self.store.quota(),
        }
    }

    /// Probe the backend with a throwaway write.
    pub fn is_available(&mut self) -> bool {
        self.store.set(PROBE_KEY, PROBE_KEY).is_ok() && self.store.remove(PROBE_KEY).is_ok()
    }

    fn is_too_old(&self, saved_at: DateTime<Utc>) -> bool {
        self.clock.now() - saved_at > self.config.max_age()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::clock::ManualClock;
    use crate::state::config::DEFAULT_STORAGE_KEY;
    use crate::state::matches::MatchKind;
    use crate::state::store::MemoryStore;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::default() + Duration::days(20_000)
    }

    fn sample() -> (Vec<Match>, Match) {
        let mut current = Match::solo("1", "Rin", t0());
        current.activate(t0());
        let queue = vec![
            Match::versus("2", "A", "B", t0()),
            Match::solo("3", "Mai", t0()),
        ];
        (queue, current)
    }

    fn snapshots(store: MemoryStore) -> (SnapshotStore<MemoryStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(t0());
        (SnapshotStore::with_clock(store, clock.clone()), clock)
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let (mut snapshots, _) = snapshots(MemoryStore::new());
        let (queue, current) = sample();

        assert_eq!(snapshots.save(&queue, Some(&current)), SaveOutcome::Saved);
        let loaded = snapshots.load().unwrap();

        assert_eq!(loaded.queue, queue);
        assert_eq!(loaded.current, Some(current));
    }

    #[test]
    fn test_saved_document_shape() {
        let (mut snapshots, _) = snapshots(MemoryStore::new());
        let (queue, current) = sample();
        snapshots.save(&queue, Some(&current));

        let raw = snapshots.store().get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["currentMatch"]["status"], "playing");
        assert_eq!(json["queue"][0]["type"], "vs");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_load_missing_is_none() {
        let (mut snapshots, _) = snapshots(MemoryStore::new());
        assert!(snapshots.load().is_none());
    }

    #[test]
    fn test_load_stale_snapshot_clears_it() {
        let (mut snapshots, clock) = snapshots(MemoryStore::new());
        let (queue, current) = sample();
        snapshots.save(&queue, Some(&current));

        clock.advance(Duration::hours(24));
        assert!(snapshots.read().unwrap().is_some());

        clock.advance(Duration::seconds(1));
        assert!(matches!(snapshots.read(), Err(SnapshotError::Stale { .. })));
        assert!(snapshots.load().is_none());
        assert_eq!(snapshots.store().get(DEFAULT_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_load_malformed_clears_it() {
        let mut store = MemoryStore::new();
        store.set(DEFAULT_STORAGE_KEY, "{not json").unwrap();
        let (mut snapshots, _) = snapshots(store);

        assert!(matches!(snapshots.read(), Err(SnapshotError::Malformed(_))));
        assert!(snapshots.load().is_none());
        assert!(snapshots.store().is_empty());
    }

    #[test]
    fn test_load_rejects_non_array_queue() {
        let mut store = MemoryStore::new();
        let doc = serde_json::json!({
            "queue": {"id": "1"},
            "currentMatch": null,
            "timestamp": t0(),
            "version": "1.0"
        });
        store.set(DEFAULT_STORAGE_KEY, &doc.to_string()).unwrap();
        let (mut snapshots, _) = snapshots(store);

        assert!(snapshots.load().is_none());
        assert!(snapshots.store().is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_match() {
        let mut store = MemoryStore::new();
        let doc = serde_json::json!({
            "queue": [
                {"id": "1", "type": "solo", "players": ["Rin"], "status": "waiting", "timestamp": t0()},
                {"id": "2", "type": "vs", "players": ["A", "B", "C"], "status": "waiting", "timestamp": t0()}
            ],
            "currentMatch": null,
            "timestamp": t0(),
            "version": "1.0"
        });
        store.set(DEFAULT_STORAGE_KEY, &doc.to_string()).unwrap();
        let (mut snapshots, _) = snapshots(store);

        assert!(matches!(
            snapshots.read(),
            Err(SnapshotError::InvalidMatch { index: 1, .. })
        ));
        assert!(snapshots.load().is_none());
        assert!(snapshots.store().is_empty());
    }

    #[test]
    fn test_load_rejects_match_without_status() {
        let mut store = MemoryStore::new();
        let doc = serde_json::json!({
            "queue": [{"id": "1", "type": "solo", "players": ["Rin"], "timestamp": t0()}],
            "timestamp": t0(),
        });
        store.set(DEFAULT_STORAGE_KEY, &doc.to_string()).unwrap();
        let (mut snapshots, _) = snapshots(store);

        assert!(snapshots.load().is_none());
    }

    fn quota_for_one_snapshot(queue: &[Match], current: &Match) -> usize {
        let (mut probe, _) = snapshots(MemoryStore::new());
        probe.save(queue, Some(current));
        probe.store().used() + 50
    }

    #[test]
    fn test_save_evicts_legacy_keys_on_quota() {
        let (queue, current) = sample();
        let quota = quota_for_one_snapshot(&queue, &current);

        let mut store = MemoryStore::with_quota(quota);
        store.set("match-queue", &"x".repeat(quota / 2)).unwrap();
        store.set("unrelated", "keep").unwrap();
        let (mut snapshots, _) = snapshots(store);

        assert_eq!(
            snapshots.save(&queue, Some(&current)),
            SaveOutcome::SavedAfterEviction
        );
        assert_eq!(snapshots.store().get("match-queue").unwrap(), None);
        assert_eq!(snapshots.store().get("unrelated").unwrap(), Some("keep".into()));
        assert_eq!(snapshots.load().unwrap().queue, queue);
    }

    #[test]
    fn test_save_gives_up_after_one_retry() {
        let (queue, current) = sample();
        let quota = quota_for_one_snapshot(&queue, &current);

        let mut store = MemoryStore::with_quota(quota);
        store.set("unrelated", &"x".repeat(quota / 2)).unwrap();
        let (mut snapshots, _) = snapshots(store);

        let outcome = snapshots.save(&queue, Some(&current));
        assert_eq!(outcome, SaveOutcome::Failed);
        assert!(!outcome.is_saved());
        assert_eq!(snapshots.store().get(DEFAULT_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_export_import() {
        let (snapshots, _) = snapshots(MemoryStore::new());
        let (queue, current) = sample();

        let json = snapshots.export_json(&queue, Some(&current)).unwrap();
        assert!(json.contains("\"exportedAt\""));

        let imported = snapshots.import_json(&json).unwrap();
        assert_eq!(imported.queue, queue);
        assert_eq!(imported.current, Some(current));

        assert!(snapshots.import_json("[]").is_err());
        let bad = r#"{"queue":[{"id":"","type":"solo","players":["Rin"],"status":"waiting","timestamp":"2024-01-01T00:00:00Z"}]}"#;
        assert!(matches!(
            snapshots.import_json(bad),
            Err(SnapshotError::InvalidMatch { index: 0, source: MatchError::EmptyId })
        ));
    }

    #[test]
    fn test_import_ignores_age() {
        let (snapshots, clock) = snapshots(MemoryStore::new());
        let (queue, current) = sample();
        let json = snapshots.export_json(&queue, Some(&current)).unwrap();

        clock.advance(Duration::days(30));
        assert!(snapshots.import_json(&json).is_ok());
    }

    #[test]
    fn test_backups() {
        let (mut snapshots, clock) = snapshots(MemoryStore::new());
        assert!(snapshots.create_backup().is_none());

        let (queue, current) = sample();
        snapshots.save(&queue, Some(&current));
        let old = snapshots.create_backup().unwrap();
        assert!(old.starts_with("match-queue-data-backup-"));

        clock.advance(Duration::days(6));
        let recent = snapshots.create_backup().unwrap();

        clock.advance(Duration::days(2));
        let removed = snapshots.cleanup_old_backups();

        assert_eq!(removed, vec![old.clone()]);
        assert_eq!(snapshots.store().get(&old).unwrap(), None);
        assert!(snapshots.store().get(&recent).unwrap().is_some());
        assert!(snapshots.store().get(DEFAULT_STORAGE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_stats_and_availability() {
        let mut store = MemoryStore::with_quota(100_000);
        store.set("other", "abc").unwrap();
        let (mut snapshots, _) = snapshots(store);
        let (queue, current) = sample();
        snapshots.save(&queue, Some(&current));

        let stats = snapshots.stats();
        let saved = snapshots.store().get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        assert_eq!(stats.snapshot_bytes, saved.len());
        assert_eq!(stats.total_bytes, saved.len() + 3);
        assert_eq!(stats.key_count, 2);
        assert_eq!(stats.quota, Some(100_000));

        assert!(snapshots.is_available());
        assert_eq!(snapshots.store().len(), 2);
        assert!(!SnapshotStore::new(MemoryStore::with_quota(4)).is_available());
    }

    #[test]
    fn test_custom_config_key() {
        let config = StorageConfig {
            key: "arcade".into(),
            max_age_hours: 1,
            ..StorageConfig::default()
        };
        let clock = ManualClock::new(t0());
        let mut snapshots = SnapshotStore::with_config(MemoryStore::new(), clock.clone(), config);
        let queue = vec![Match::new("9", MatchKind::Solo, vec!["Kai".into()], t0())];

        snapshots.save(&queue, None);
        assert!(snapshots.store().get("arcade").unwrap().is_some());

        clock.advance(Duration::minutes(61));
        assert!(snapshots.load().is_none());
    }
}
