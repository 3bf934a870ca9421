//! State management module for the match queue.
//!
//! This module provides the core state types and their collaborators:
//!
//! - `matches` - Match records, kinds, lifecycle states, validation
//! - `engine` - The active slot + queue state machine
//! - `notify` - Change listeners
//! - `clock` - Injectable time sources
//! - `store` - Key-value storage backends
//! - `snapshot` - Snapshot save/load with freshness checks
//! - `autosave` - Debounced saving
//! - `config` - Defaults and JSON configuration
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          PersistentQueue                              │
//! │                                                                       │
//! │  ┌──────────────────────────┐   on_change   ┌──────────────────────┐  │
//! │  │       QueueEngine        │──────────────▶│      AutoSaver       │  │
//! │  │                          │               │  (debounced writes)  │  │
//! │  │  active slot: Match?     │               └──────────┬───────────┘  │
//! │  │  queue: [Match, ...]     │                          │ save         │
//! │  │                          │               ┌──────────▼───────────┐  │
//! │  │  submit / promote_next   │    restore    │    SnapshotStore     │  │
//! │  │  complete / cancel       │◀──────────────│  JSON + freshness    │  │
//! │  │  remove / edit / move    │               └──────────┬───────────┘  │
//! │  └──────────────────────────┘                          │              │
//! │                                               ┌────────▼─────────┐    │
//! │                                               │  KeyValueStore   │    │
//! │                                               └──────────────────┘    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use match_queue_state::state::{QueueEngine, Match};
//!
//! let mut engine = QueueEngine::new();
//! engine.on_change(|event, state| println!("{:?}: {} waiting", event.kind, state.len()));
//! engine.create_match(["Rin"])?;
//! engine.create_match(["A", "B"])?;
//! engine.complete();
//! engine.promote_next();
//! ```

pub mod autosave;
pub mod clock;
pub mod config;
pub mod engine;
pub mod matches;
pub mod notify;
pub mod snapshot;
pub mod store;

use std::cell::RefCell;
use std::rc::Rc;

use tracing::warn;

// Re-export commonly used types
pub use autosave::AutoSaver;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    QueueConfig, StorageConfig, DEFAULT_AUTOSAVE_DELAY_MS, DEFAULT_BACKUP_RETENTION_DAYS,
    DEFAULT_MAX_SNAPSHOT_AGE_HOURS, DEFAULT_STORAGE_KEY, LEGACY_STORAGE_KEYS, SNAPSHOT_VERSION,
};
pub use engine::{MoveOutcome, Placement, QueueEngine, QueueError, QueueState, QueueStats};
pub use matches::{Match, MatchError, MatchId, MatchKind, MatchState, MAX_PARTICIPANTS};
pub use notify::{ChangeEvent, ChangeKind, ListenerId, Listeners};
pub use snapshot::{LoadedQueue, SaveOutcome, Snapshot, SnapshotError, SnapshotStore, StorageStats};
pub use store::{KeyValueStore, MemoryStore, StoreError};

/// Engine wired to snapshot storage.
///
/// Opening restores the last fresh snapshot; every committed change after
/// that schedules a debounced save, written by [`PersistentQueue::tick`].
#[derive(Debug)]
pub struct PersistentQueue<S, C: Clock = SystemClock> {
    engine: QueueEngine<C>,
    snapshots: SnapshotStore<S, C>,
    autosave: Rc<RefCell<AutoSaver>>,
    autosave_listener: ListenerId,
}

impl<S: KeyValueStore, C: Clock + Clone> PersistentQueue<S, C> {
    /// Open over `store`, restoring any fresh snapshot it holds.
    pub fn open(store: S, clock: C, config: &QueueConfig) -> Self {
        let mut engine = QueueEngine::with_clock(clock.clone());
        let mut snapshots = SnapshotStore::with_config(store, clock, config.storage.clone());

        if let Some(loaded) = snapshots.load() {
            if let Err(e) = engine.restore(loaded.queue, loaded.current) {
                warn!(error = %e, "Saved snapshot could not be restored, starting fresh");
                snapshots.clear();
            }
        }

        let autosave = Rc::new(RefCell::new(AutoSaver::new(config.autosave_delay())));
        let pending = autosave.clone();
        let autosave_listener = engine.on_change(move |event: &ChangeEvent, _: &QueueState| {
            pending.borrow_mut().note_change(event.at);
        });

        Self {
            engine,
            snapshots,
            autosave,
            autosave_listener,
        }
    }

    pub fn engine(&self) -> &QueueEngine<C> {
        &self.engine
    }

    /// Commands go through here; their changes are saved on a later tick.
    pub fn engine_mut(&mut self) -> &mut QueueEngine<C> {
        &mut self.engine
    }

    pub fn snapshots(&self) -> &SnapshotStore<S, C> {
        &self.snapshots
    }

    pub fn has_pending_save(&self) -> bool {
        self.autosave.borrow().is_pending()
    }

    /// Write a pending save if its quiet period has elapsed.
    pub fn tick(&mut self) -> Option<SaveOutcome> {
        let now = self.engine.clock().now();
        self.autosave
            .borrow_mut()
            .flush_if_due(now, &self.engine, &mut self.snapshots)
    }

    /// Write now, pending or not.
    pub fn save_now(&mut self) -> SaveOutcome {
        self.autosave
            .borrow_mut()
            .flush(&self.engine, &mut self.snapshots)
    }

    /// Flush any pending save and hand back the storage backend.
    pub fn close(mut self) -> S {
        if self.has_pending_save() {
            self.save_now();
        }
        self.engine.unsubscribe(self.autosave_listener);
        self.snapshots.into_store()
    }
}
