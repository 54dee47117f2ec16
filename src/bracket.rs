use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::PlayerRef;

/// The remote bracket service's view of a whole tournament.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RemoteTournament {
    pub id: String,
    pub name: String,
    pub participant_limit: Option<u32>,
    pub state: RemoteState,
    pub participants: Vec<RemoteParticipant>,
    pub matches: Vec<RemoteMatch>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum RemoteState {
    #[default]
    Pending,
    Underway,
    Complete,
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Underway => write!(f, "underway"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RemoteParticipant {
    pub player: PlayerRef,
    pub name: String,
}

/// A pairing as reported by the bracket service.
///
/// `Pending` pairings wait on predecessor matches; only `Open` ones are
/// playable and worth materializing locally.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RemoteMatch {
    pub id: u64,
    pub round: i64,
    pub player1: PlayerRef,
    pub player2: PlayerRef,
    pub state: RemoteMatchState,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum RemoteMatchState {
    #[default]
    Pending,
    Open,
    Complete,
}

#[derive(Debug, Error)]
pub enum BracketError {
    /// Network trouble or rate limiting; retried on the next tick.
    #[error("the bracket service is unavailable: {0}")]
    Transient(String),

    /// The service understood the request and said no.
    #[error("the bracket service rejected the request: {0}")]
    Permanent(String),
}

impl BracketError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Read/write access to the external bracket service, consumed only.
/// Pairing and seeding stay on the remote side.
pub trait BracketClient: Send + Sync {
    /// Fetch the remote view of a tournament.
    ///
    /// # Errors
    ///
    /// Callers must honor the transient/permanent split on failure.
    fn fetch(&self, tournament: &str) -> Result<RemoteTournament, BracketError>;

    /// Mark a match underway on the bracket, so the remote side stops
    /// re-pairing it. Advisory; local launch stands even if this fails.
    ///
    /// # Errors
    ///
    /// Callers must honor the transient/permanent split on failure.
    fn mark_underway(&self, tournament: &str, match_id: u64) -> Result<(), BracketError>;
}
