//! Save coalescing.
//!
//! Rapid successive changes collapse into one write: each change pushes the
//! deadline back, and the save happens once the engine has been quiet for the
//! configured delay. The engine's behavior never depends on when, or whether,
//! a save lands.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::clock::Clock;
use super::engine::QueueEngine;
use super::snapshot::{SaveOutcome, SnapshotStore};
use super::store::KeyValueStore;

/// Debounced save scheduler.
#[derive(Debug, Clone)]
pub struct AutoSaver {
    delay: Duration,
    /// Time of the latest unsaved change
    pending_since: Option<DateTime<Utc>>,
    saves: usize,
}

impl AutoSaver {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending_since: None,
            saves: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a change at `at`, restarting the quiet period.
    pub fn note_change(&mut self, at: DateTime<Utc>) {
        self.pending_since = Some(at);
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Check if the quiet period has elapsed since the latest change.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.pending_since
            .is_some_and(|since| now - since >= self.delay)
    }

    /// Number of writes performed so far.
    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Save if a change is pending and the quiet period has elapsed.
    pub fn flush_if_due<S, C, D>(
        &mut self,
        now: DateTime<Utc>,
        engine: &QueueEngine<C>,
        snapshots: &mut SnapshotStore<S, D>,
    ) -> Option<SaveOutcome>
    where
        S: KeyValueStore,
        C: Clock,
        D: Clock,
    {
        if !self.is_due(now) {
            return None;
        }
        Some(self.flush(engine, snapshots))
    }

    /// Save immediately. A failed save is not retried later.
    pub fn flush<S, C, D>(&mut self, engine: &QueueEngine<C>, snapshots: &mut SnapshotStore<S, D>) -> SaveOutcome
    where
        S: KeyValueStore,
        C: Clock,
        D: Clock,
    {
        let (queue, current) = engine.snapshot_parts();
        let outcome = snapshots.save(queue, current);
        self.pending_since = None;
        self.saves += 1;
        debug!(?outcome, saves = self.saves, "Autosave flushed");
        outcome
    }
}
