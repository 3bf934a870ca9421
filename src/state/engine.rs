//! Queue engine.
//!
//! Owns the active slot and the waiting line, enforces the transition rules
//! between them, and notifies listeners after every committed change.
//!
//! Invariants held after every command:
//!
//! - at most one match is `Active`, and it is the one in the active slot
//! - every queued match is `Waiting`
//! - no id appears twice across the slot and the queue
//! - every match has one or two participants

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::matches::{derive_kind, normalize_names, Match, MatchError, MatchId, MatchKind, MatchState};
use super::notify::{ChangeEvent, ChangeKind, ListenerId, Listeners};

/// Engine command errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("invalid match: {0}")]
    InvalidMatch(#[from] MatchError),

    #[error("match {0} is already tracked")]
    DuplicateId(MatchId),

    #[error("reorder must list every queued match exactly once (queue has {expected}, got {received})")]
    PermutationMismatch { expected: usize, received: usize },
}

/// Where a submitted match landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Went straight into the empty active slot
    Activated,
    /// Appended to the queue at this 1-based position
    Enqueued { position: usize },
}

/// Result of moving a queued match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Positions are 1-based
    Moved { from: usize, to: usize },
    Unchanged,
    NotFound,
}

/// Counts derived from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_matches: usize,
    pub versus_matches: usize,
    pub solo_matches: usize,
    pub queue_length: usize,
    pub has_current_match: bool,
}

/// The active slot and the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueState {
    current: Option<Match>,
    queue: Vec<Match>,
}

impl QueueState {
    /// Match in the active slot.
    pub fn current(&self) -> Option<&Match> {
        self.current.as_ref()
    }

    /// Waiting matches, head first.
    pub fn queue(&self) -> &[Match] {
        &self.queue
    }

    /// Look up a tracked match, active or waiting.
    pub fn get(&self, id: &MatchId) -> Option<&Match> {
        self.current
            .iter()
            .chain(self.queue.iter())
            .find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MatchId) -> bool {
        self.get(id).is_some()
    }

    /// 1-based queue position. The active match has none.
    pub fn position_of(&self, id: &MatchId) -> Option<usize> {
        self.index_of(id).map(|i| i + 1)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn stats(&self) -> QueueStats {
        let tracked = || self.current.iter().chain(self.queue.iter());
        let versus = tracked().filter(|m| m.kind == MatchKind::Versus).count();
        let total = tracked().count();
        QueueStats {
            total_matches: total,
            versus_matches: versus,
            solo_matches: total - versus,
            queue_length: self.queue.len(),
            has_current_match: self.current.is_some(),
        }
    }

    fn index_of(&self, id: &MatchId) -> Option<usize> {
        self.queue.iter().position(|m| &m.id == id)
    }
}

/// Single-slot match queue.
///
/// Each engine is an independent value; nothing is shared between instances.
#[derive(Debug)]
pub struct QueueEngine<C: Clock = SystemClock> {
    state: QueueState,
    listeners: Listeners<QueueState>,
    clock: C,
}

impl QueueEngine<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for QueueEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> QueueEngine<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            state: QueueState::default(),
            listeners: Listeners::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Borrow the full state.
    pub fn state(&self) -> &QueueState {
        &self.state
    }

    /// Copy of the active match.
    pub fn current(&self) -> Option<Match> {
        self.state.current.clone()
    }

    /// Copy of the queue, head first.
    pub fn queue(&self) -> Vec<Match> {
        self.state.queue.clone()
    }

    /// Copy of a tracked match.
    pub fn get(&self, id: &MatchId) -> Option<Match> {
        self.state.get(id).cloned()
    }

    pub fn position_of(&self, id: &MatchId) -> Option<usize> {
        self.state.position_of(id)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.state.stats()
    }

    /// Queue and active match in the shape the snapshot store saves.
    pub fn snapshot_parts(&self) -> (&[Match], Option<&Match>) {
        (self.state.queue(), self.state.current())
    }

    /// Register a change listener.
    pub fn on_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ChangeEvent, &QueueState) + 'static,
    {
        self.listeners.add(listener)
    }

    /// Remove a change listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Hand a new match to the engine.
    ///
    /// The declared kind must agree with the participant count. The match
    /// becomes active if the slot is free, otherwise it joins the tail.
    pub fn submit(&mut self, mut m: Match) -> Result<Placement, QueueError> {
        if let Err(e) = m.validate() {
            warn!(match_id = %m.id, error = %e, "Rejected invalid match");
            return Err(e.into());
        }
        if self.state.contains(&m.id) {
            warn!(match_id = %m.id, "Rejected duplicate match id");
            return Err(QueueError::DuplicateId(m.id));
        }

        let now = self.clock.now();
        if self.state.current.is_none() {
            debug!(match_id = %m.id, "Match activated on submit");
            m.activate(now);
            self.state.current = Some(m);
            self.emit(ChangeKind::CurrentChanged, now);
            Ok(Placement::Activated)
        } else {
            m.state = MatchState::Waiting;
            debug!(match_id = %m.id, "Match enqueued");
            self.state.queue.push(m);
            let position = self.state.queue.len();
            self.emit(ChangeKind::QueueChanged, now);
            Ok(Placement::Enqueued { position })
        }
    }

    /// Build a match from raw names and submit it under a fresh id.
    ///
    /// Names are trimmed, blanks dropped, and the kind follows the count.
    pub fn create_match<I, S>(&mut self, names: I) -> Result<(Match, Placement), QueueError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names);
        let kind = derive_kind(&names)?;
        let m = Match::new(MatchId::generate(), kind, names, self.clock.now());
        let id = m.id.clone();
        let placement = self.submit(m)?;
        let stored = self.state.get(&id).cloned().ok_or(QueueError::DuplicateId(id))?;
        Ok((stored, placement))
    }

    /// Activate the head of the queue.
    ///
    /// Returns `None` without changing anything when the queue is empty or
    /// the active slot is occupied.
    pub fn promote_next(&mut self) -> Option<Match> {
        if let Some(current) = &self.state.current {
            debug!(match_id = %current.id, "Promote skipped, active slot occupied");
            return None;
        }
        if self.state.queue.is_empty() {
            return None;
        }

        let now = self.clock.now();
        let mut next = self.state.queue.remove(0);
        next.activate(now);
        debug!(match_id = %next.id, "Match promoted");
        self.state.current = Some(next.clone());
        self.emit(ChangeKind::CurrentChanged, now);
        self.emit(ChangeKind::QueueChanged, now);
        Some(next)
    }

    /// Finish the active match. The returned record is no longer tracked.
    pub fn complete(&mut self) -> Option<Match> {
        let mut ended = self.state.current.take()?;
        let now = self.clock.now();
        ended.complete(now);
        debug!(match_id = %ended.id, "Match completed");
        self.emit(ChangeKind::CurrentChanged, now);
        Some(ended)
    }

    /// Pull the active match out and put it back at the head of the queue.
    ///
    /// The returned copy is `Canceled`; the queued record is `Waiting` and
    /// keeps its `canceled_at` stamp.
    pub fn cancel(&mut self) -> Option<Match> {
        let mut canceled = self.state.current.take()?;
        let now = self.clock.now();
        canceled.mark_canceled(now);
        let returned = canceled.clone();

        canceled.state = MatchState::Waiting;
        debug!(match_id = %canceled.id, "Match canceled, requeued at head");
        self.state.queue.insert(0, canceled);

        self.emit(ChangeKind::CurrentChanged, now);
        self.emit(ChangeKind::QueueChanged, now);
        Some(returned)
    }

    /// Drop a waiting match. The returned record is no longer tracked.
    pub fn remove(&mut self, id: &MatchId) -> Option<Match> {
        let index = self.state.index_of(id)?;
        let removed = self.state.queue.remove(index);
        debug!(match_id = %removed.id, "Match removed");
        let now = self.clock.now();
        self.emit(ChangeKind::QueueChanged, now);
        Some(removed)
    }

    /// Replace a waiting match's participants, deriving its kind.
    ///
    /// `Ok(false)` if no queued match has this id.
    pub fn edit<I, S>(&mut self, id: &MatchId, names: I) -> Result<bool, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = self.clock.now();
        let Some(m) = self.state.queue.iter_mut().find(|m| &m.id == id) else {
            return Ok(false);
        };
        m.set_participants(names, now)?;
        debug!(match_id = %id, kind = %m.kind, "Match edited");
        self.emit(ChangeKind::QueueChanged, now);
        Ok(true)
    }

    /// Move a waiting match to a 1-based position, clamped to the queue.
    pub fn move_to(&mut self, id: &MatchId, position: usize) -> MoveOutcome {
        let Some(from) = self.state.index_of(id) else {
            return MoveOutcome::NotFound;
        };
        let to = position.clamp(1, self.state.queue.len()) - 1;
        if to == from {
            return MoveOutcome::Unchanged;
        }

        let m = self.state.queue.remove(from);
        self.state.queue.insert(to, m);
        debug!(match_id = %id, from = from + 1, to = to + 1, "Match moved");
        let now = self.clock.now();
        self.emit(ChangeKind::QueueChanged, now);
        MoveOutcome::Moved {
            from: from + 1,
            to: to + 1,
        }
    }

    /// Reorder the whole queue.
    ///
    /// `ids` must be exactly a permutation of the queued ids, otherwise
    /// nothing changes. `Ok(false)` if the order was already as given.
    pub fn reorder_all(&mut self, ids: &[MatchId]) -> Result<bool, QueueError> {
        let mismatch = || QueueError::PermutationMismatch {
            expected: self.state.queue.len(),
            received: ids.len(),
        };

        if ids.len() != self.state.queue.len() {
            return Err(mismatch());
        }
        let mut wanted: Vec<&MatchId> = ids.iter().collect();
        let mut have: Vec<&MatchId> = self.state.queue.iter().map(|m| &m.id).collect();
        wanted.sort();
        have.sort();
        if wanted != have {
            warn!(received = ids.len(), "Rejected reorder that is not a permutation");
            return Err(mismatch());
        }

        if self.state.queue.iter().map(|m| &m.id).eq(ids.iter()) {
            return Ok(false);
        }

        let mut by_id: HashMap<MatchId, Match> = self
            .state
            .queue
            .drain(..)
            .map(|m| (m.id.clone(), m))
            .collect();
        self.state.queue = ids.iter().filter_map(|id| by_id.remove(id)).collect();

        debug!(count = ids.len(), "Queue reordered");
        let now = self.clock.now();
        self.emit(ChangeKind::QueueChanged, now);
        Ok(true)
    }

    /// Drop the active match and every waiting match.
    pub fn clear(&mut self) {
        let now = self.clock.now();
        let had_current = self.state.current.take().is_some();
        let had_queue = !self.state.queue.is_empty();
        self.state.queue.clear();

        if had_current {
            self.emit(ChangeKind::CurrentChanged, now);
        }
        if had_queue {
            self.emit(ChangeKind::QueueChanged, now);
        }
        if had_current || had_queue {
            debug!("Queue cleared");
        }
    }

    /// Replace all state with previously saved records.
    ///
    /// Queued records are normalized to `Waiting` and the current one to
    /// `Active`. Nothing changes if any record is malformed or an id repeats.
    pub fn restore(&mut self, queue: Vec<Match>, current: Option<Match>) -> Result<(), QueueError> {
        let mut seen = HashSet::new();
        for m in current.iter().chain(queue.iter()) {
            m.validate_structure()?;
            if !seen.insert(&m.id) {
                return Err(QueueError::DuplicateId(m.id.clone()));
            }
        }

        let now = self.clock.now();
        self.state.queue = queue
            .into_iter()
            .map(|mut m| {
                m.state = MatchState::Waiting;
                m
            })
            .collect();
        self.state.current = current.map(|mut m| {
            m.state = MatchState::Active;
            if m.started_at.is_none() {
                m.started_at = Some(now);
            }
            m
        });

        debug!(
            queue_length = self.state.queue.len(),
            has_current = self.state.current.is_some(),
            "Queue restored"
        );
        self.emit(ChangeKind::CurrentChanged, now);
        self.emit(ChangeKind::QueueChanged, now);
        Ok(())
    }

    fn emit(&mut self, kind: ChangeKind, at: DateTime<Utc>) {
        let event = ChangeEvent { kind, at };
        self.listeners.dispatch(&event, &self.state);
    }
}
