//! Match Queue State Library
//!
//! This crate provides state management for a turn-based venue where exactly
//! one match is played at a time and the rest wait in line.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Queue Engine** - Owns the active slot and the waiting line, and moves
//!   matches between `Waiting`, `Active`, `Completed` and `Canceled` with
//!   validated transitions.
//!
//! - **Change Notification** - Typed listeners called synchronously after
//!   every committed change, with an unsubscribe handle.
//!
//! - **Snapshot Persistence** - Best-effort save/load of the queue through a
//!   key-value store, with structural validation and a freshness window.
//!
//! - **Autosave** - Debounced saving so bursts of changes become one write.
//!
//! # Design Principles
//!
//! 1. **Invariants after every command** - At most one active match, only
//!    waiting matches in the queue, no duplicate ids.
//!
//! 2. **Not found is not an error** - Commands on unknown ids return
//!    `None`/`false`; only malformed input is rejected with an error.
//!
//! 3. **Injectable time** - Every timestamp comes from a [`Clock`].
//!
//! 4. **Serialization-ready** - Matches and snapshots are plain JSON.
//!
//! # Example
//!
//! ```rust
//! use match_queue_state::state::{Match, MatchId, Placement, QueueEngine};
//!
//! let mut engine = QueueEngine::new();
//! let now = chrono::Utc::now();
//!
//! // First match goes straight into the active slot
//! let placement = engine.submit(Match::solo("1", "Rin", now)).unwrap();
//! assert_eq!(placement, Placement::Activated);
//!
//! // The next one waits
//! engine.submit(Match::versus("2", "A", "B", now)).unwrap();
//! assert_eq!(engine.position_of(&MatchId::new("2")), Some(1));
//!
//! // Canceling puts the active match back at the head of the queue
//! engine.cancel();
//! assert_eq!(engine.position_of(&MatchId::new("1")), Some(1));
//!
//! // ...so it is the next one played
//! let next = engine.promote_next().unwrap();
//! assert_eq!(next.id, MatchId::new("1"));
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
