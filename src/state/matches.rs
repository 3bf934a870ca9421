//! Match records.
//!
//! A match is one unit of play: one or two participants, a kind derived from
//! how many there are, and the lifecycle timestamps the engine stamps as the
//! match moves through its states.
//!
//! # State Diagram
//!
//! ```text
//!              submit (slot empty)
//!   (new) ─────────────────────────────▶ ┌──────────┐  complete  ┌───────────┐
//!     │                                  │  Active  │───────────▶│ Completed │
//!     │ submit (slot taken)              └────┬─────┘            └───────────┘
//!     ▼                                       │ ▲
//!  ┌──────────┐      promote_next             │ │
//!  │ Waiting  │───────────────────────────────┼─┘
//!  └──────────┘                               │ cancel
//!     ▲  │ remove                             ▼
//!     │  ▼                               ┌──────────┐
//!     │ (gone)                           │ Canceled │
//!     │                                  └────┬─────┘
//!     └───────────── back to queue head ──────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum participants in a single match.
pub const MAX_PARTICIPANTS: usize = 2;

/// Opaque match identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MatchId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Match kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    /// Two participants
    #[serde(rename = "vs")]
    Versus,
    /// One participant
    #[serde(rename = "solo")]
    Solo,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Versus => "vs",
            Self::Solo => "solo",
        }
    }

    /// Kind implied by a participant count.
    pub fn for_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Self::Solo),
            2 => Some(Self::Versus),
            _ => None,
        }
    }

    /// Participants this kind expects.
    pub fn participant_count(&self) -> usize {
        match self {
            Self::Versus => 2,
            Self::Solo => 1,
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchState {
    /// In the queue
    #[default]
    Waiting,
    /// Occupying the active slot
    #[serde(rename = "playing")]
    Active,
    /// Finished normally
    Completed,
    /// Pulled out of the active slot
    Canceled,
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "playing",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

/// Structural problems with a match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("match id is empty")]
    EmptyId,

    #[error("match has no participants")]
    NoParticipants,

    #[error("match has {0} participants, at most 2 allowed")]
    TooManyParticipants(usize),

    #[error("every participant name is blank")]
    BlankParticipants,

    #[error("{kind} match cannot have {count} participant(s)")]
    KindMismatch { kind: MatchKind, count: usize },
}

/// A single match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// Unique match ID
    pub id: MatchId,

    /// Versus or solo
    #[serde(rename = "type")]
    pub kind: MatchKind,

    /// Display names, in order
    #[serde(rename = "players")]
    pub participants: Vec<String>,

    /// Lifecycle state
    #[serde(rename = "status")]
    pub state: MatchState,

    /// When the match was created
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,

    /// When the match last entered the active slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the match was completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// When the match was last canceled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,

    /// When the participants were last edited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Create a waiting match.
    pub fn new(
        id: impl Into<MatchId>,
        kind: MatchKind,
        participants: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            participants,
            state: MatchState::Waiting,
            created_at,
            started_at: None,
            ended_at: None,
            canceled_at: None,
            updated_at: None,
        }
    }

    pub fn solo(id: impl Into<MatchId>, player: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(id, MatchKind::Solo, vec![player.into()], created_at)
    }

    pub fn versus(
        id: impl Into<MatchId>,
        first: impl Into<String>,
        second: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            MatchKind::Versus,
            vec![first.into(), second.into()],
            created_at,
        )
    }

    /// Validate shape and check the declared kind against the participant count.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.id.is_empty() {
            return Err(MatchError::EmptyId);
        }
        check_participants(&self.participants)?;
        if self.kind.participant_count() != self.participants.len() {
            return Err(MatchError::KindMismatch {
                kind: self.kind,
                count: self.participants.len(),
            });
        }
        Ok(())
    }

    /// Validate only what a stored record must carry: an id, a kind and one
    /// or two participants.
    pub fn validate_structure(&self) -> Result<(), MatchError> {
        if self.id.is_empty() {
            return Err(MatchError::EmptyId);
        }
        match self.participants.len() {
            0 => Err(MatchError::NoParticipants),
            n if n > MAX_PARTICIPANTS => Err(MatchError::TooManyParticipants(n)),
            _ => Ok(()),
        }
    }

    /// Replace participants, deriving the kind from what is left after
    /// trimming and dropping blank names.
    pub fn set_participants<I, S>(&mut self, names: I, at: DateTime<Utc>) -> Result<(), MatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names);
        let kind = derive_kind(&names)?;
        self.participants = names;
        self.kind = kind;
        self.updated_at = Some(at);
        Ok(())
    }

    pub fn is_versus(&self) -> bool {
        self.kind == MatchKind::Versus
    }

    pub fn is_solo(&self) -> bool {
        self.kind == MatchKind::Solo
    }

    /// Participants joined for display, e.g. `"A vs B"`.
    pub fn title(&self) -> String {
        self.participants.join(" vs ")
    }

    pub(crate) fn activate(&mut self, at: DateTime<Utc>) {
        self.state = MatchState::Active;
        self.started_at = Some(at);
    }

    pub(crate) fn complete(&mut self, at: DateTime<Utc>) {
        self.state = MatchState::Completed;
        self.ended_at = Some(at);
    }

    pub(crate) fn mark_canceled(&mut self, at: DateTime<Utc>) {
        self.state = MatchState::Canceled;
        self.canceled_at = Some(at);
    }
}

/// Trim names and drop the blank ones.
pub fn normalize_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Kind for an already-normalized participant list.
pub fn derive_kind(names: &[String]) -> Result<MatchKind, MatchError> {
    check_participants(names)?;
    MatchKind::for_count(names.len()).ok_or(MatchError::TooManyParticipants(names.len()))
}

fn check_participants(names: &[String]) -> Result<(), MatchError> {
    match names.len() {
        0 => return Err(MatchError::NoParticipants),
        n if n > MAX_PARTICIPANTS => return Err(MatchError::TooManyParticipants(n)),
        _ => {}
    }
    if names.iter().all(|n| n.trim().is_empty()) {
        return Err(MatchError::BlankParticipants);
    }
    Ok(())
}
