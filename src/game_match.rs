use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::{PlayerRef, VenueRef};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum MatchState {
    #[default]
    Pending,
    Ongoing,
    Finished,
    FlaggedAfk,
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Finished => write!(f, "finished"),
            Self::FlaggedAfk => write!(f, "flagged-afk"),
        }
    }
}

/// One pairing of the bracket, mirrored locally.
///
/// `last_activity` doubles as the AFK clock while the match is ongoing
/// and as the cleanup clock once it is finished. `afk_check` is turned
/// off when the loop is paused and stays off for this match; the flag is
/// persisted so a pause survives a process restart.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Match {
    pub id: u64,
    pub round: i64,
    pub player1: PlayerRef,
    pub player2: PlayerRef,
    #[serde(default)]
    pub venue: Option<VenueRef>,
    #[serde(default)]
    pub state: MatchState,
    pub last_activity: DateTime<Utc>,
    #[serde(default = "enabled")]
    pub afk_check: bool,
    #[serde(default)]
    pub on_stream: bool,
}

fn enabled() -> bool {
    true
}

impl Match {
    #[must_use]
    pub fn new(id: u64, round: i64, player1: PlayerRef, player2: PlayerRef) -> Self {
        Self {
            id,
            round,
            player1,
            player2,
            venue: None,
            state: MatchState::Pending,
            last_activity: Utc::now(),
            afk_check: true,
            on_stream: false,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    #[must_use]
    pub fn idle_for(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_activity
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "match {} round {}: {} vs {} ({})",
            self.id, self.round, self.player1, self.player2, self.state
        )
    }
}
