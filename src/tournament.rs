// This file is part of bracket-warden.
//
// bracket-warden is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// bracket-warden is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    TenantId,
    config::Config,
    error::OpError,
    game_match::{Match, MatchState},
    participant::Participant,
    phase::Phase,
    platform::PlayerRef,
    task::LoopTask,
};

/// The in-memory aggregate for one tenant's tournament.
///
/// `task` owns the running reconciliation loop, at most one per
/// aggregate; it never hits disk. Everything else round-trips through
/// [`TournamentSerialized`].
#[derive(Debug)]
pub struct Tournament {
    pub tenant: TenantId,
    /// Identifier assigned by the external bracket service.
    pub id: String,
    pub name: String,
    pub participant_limit: Option<u32>,
    pub phase: Phase,
    pub config: Config,
    pub participants: Vec<Participant>,
    pub matches: Vec<Match>,
    pub task: Option<LoopTask>,
}

impl Tournament {
    #[must_use]
    pub fn new(tenant: TenantId, id: String, name: String, config: Config) -> Self {
        Self {
            tenant,
            id,
            name,
            participant_limit: None,
            phase: Phase::default(),
            config,
            participants: Vec::new(),
            matches: Vec::new(),
            task: None,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> TournamentSerialized {
        TournamentSerialized::from(self)
    }

    /// Whether the loop task is live. A task that stopped itself after a
    /// fatal tick still holds its handle until the next start joins it,
    /// but it no longer counts as running.
    #[must_use]
    pub fn task_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_stopped())
    }

    /// The loop may only be live while the tournament is ongoing.
    ///
    /// # Errors
    ///
    /// `LoopStillRunning` when leaving `Ongoing` under a live task.
    pub fn set_phase(&mut self, phase: Phase) -> Result<(), OpError> {
        if phase != Phase::Ongoing && self.task_running() {
            return Err(OpError::LoopStillRunning);
        }

        self.phase = phase;
        Ok(())
    }

    #[must_use]
    pub fn participant(&self, player: PlayerRef) -> Option<&Participant> {
        self.participants.iter().find(|p| p.player == player)
    }

    /// Adds a participant, unique per underlying identity.
    pub fn add_participant(&mut self, participant: Participant) -> bool {
        if self.participant(participant.player).is_some() {
            return false;
        }

        self.participants.push(participant);
        true
    }

    #[must_use]
    pub fn match_by_id(&self, id: u64) -> Option<&Match> {
        self.matches.iter().find(|m| m.id == id)
    }

    /// Turns AFK flagging off for every ongoing match and reports how
    /// many were touched. Called on pause so nobody gets flagged while
    /// the operator investigates.
    pub fn disable_afk_checks(&mut self) -> usize {
        let mut disabled = 0;
        for game_match in &mut self.matches {
            if game_match.state == MatchState::Ongoing && game_match.afk_check {
                game_match.afk_check = false;
                disabled += 1;
            }
        }

        disabled
    }
}

impl fmt::Display for Tournament {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} participants, {} matches)",
            self.name,
            self.phase,
            self.participants.len(),
            self.matches.len()
        )
    }
}

/// The persistable form of a [`Tournament`]; what the store writes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TournamentSerialized {
    pub tenant: TenantId,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub participant_limit: Option<u32>,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub matches: Vec<Match>,
}

impl From<&Tournament> for TournamentSerialized {
    fn from(tournament: &Tournament) -> Self {
        Self {
            tenant: tournament.tenant,
            id: tournament.id.clone(),
            name: tournament.name.clone(),
            participant_limit: tournament.participant_limit,
            phase: tournament.phase,
            config: tournament.config,
            participants: tournament.participants.clone(),
            matches: tournament.matches.clone(),
        }
    }
}

impl From<TournamentSerialized> for Tournament {
    fn from(tournament: TournamentSerialized) -> Self {
        Self {
            tenant: tournament.tenant,
            id: tournament.id,
            name: tournament.name,
            participant_limit: tournament.participant_limit,
            phase: tournament.phase,
            config: tournament.config,
            participants: tournament.participants,
            matches: tournament.matches,
            task: None,
        }
    }
}
