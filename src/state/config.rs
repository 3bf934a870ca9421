//! Configuration.
//!
//! Every field has a default, so a JSON document only needs the values it
//! wants to override.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Storage key for the live snapshot.
pub const DEFAULT_STORAGE_KEY: &str = "match-queue-data";

/// Keys left behind by older layouts, evicted when storage is full.
pub const LEGACY_STORAGE_KEYS: &[&str] = &["match-queue", "match-queue-v1", "match-queue-current-match"];

/// Snapshots older than this are discarded on load (24 hours).
pub const DEFAULT_MAX_SNAPSHOT_AGE_HOURS: u32 = 24;

/// Backups older than this are removed by cleanup (7 days).
pub const DEFAULT_BACKUP_RETENTION_DAYS: u32 = 7;

/// Quiet period before a pending save is written (500 ms).
pub const DEFAULT_AUTOSAVE_DELAY_MS: u32 = 500;

/// Snapshot format version written by this crate.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Snapshot storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub key: String,
    pub legacy_keys: Vec<String>,
    pub max_age_hours: u32,
    pub backup_retention_days: u32,
    pub version: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_STORAGE_KEY.to_string(),
            legacy_keys: LEGACY_STORAGE_KEYS.iter().map(|k| k.to_string()).collect(),
            max_age_hours: DEFAULT_MAX_SNAPSHOT_AGE_HOURS,
            backup_retention_days: DEFAULT_BACKUP_RETENTION_DAYS,
            version: SNAPSHOT_VERSION.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn max_age(&self) -> Duration {
        Duration::hours(i64::from(self.max_age_hours))
    }

    pub fn backup_retention(&self) -> Duration {
        Duration::days(i64::from(self.backup_retention_days))
    }

    /// Prefix shared by every backup key.
    pub fn backup_prefix(&self) -> String {
        format!("{}-backup-", self.key)
    }
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    pub storage: StorageConfig,
    pub autosave_delay_ms: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            autosave_delay_ms: DEFAULT_AUTOSAVE_DELAY_MS,
        }
    }
}

impl QueueConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::milliseconds(i64::from(self.autosave_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.storage.key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.storage.max_age(), Duration::hours(24));
        assert_eq!(config.storage.backup_retention(), Duration::days(7));
        assert_eq!(config.autosave_delay(), Duration::milliseconds(500));
        assert_eq!(config.storage.backup_prefix(), "match-queue-data-backup-");
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = QueueConfig::from_json(
            r#"{"autosaveDelayMs": 50, "storage": {"key": "arcade", "maxAgeHours": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.autosave_delay_ms, 50);
        assert_eq!(config.storage.key, "arcade");
        assert_eq!(config.storage.max_age_hours, 2);
        assert_eq!(config.storage.backup_retention_days, DEFAULT_BACKUP_RETENTION_DAYS);
        assert_eq!(config.storage.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(QueueConfig::from_json("{}").unwrap(), QueueConfig::default());
        assert!(QueueConfig::from_json("42").is_err());
    }
}
