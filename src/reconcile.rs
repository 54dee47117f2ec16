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

use std::{fmt, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use thiserror::Error;

use crate::{
    bracket::{BracketClient, RemoteMatchState, RemoteTournament},
    game_match::{Match, MatchState},
    participant::Participant,
    platform::{Platform, PlatformError, PlayerRef},
    store::Store,
    tournament::Tournament,
};

/// Everything a tick talks to besides the aggregate itself.
#[derive(Clone)]
pub struct Services {
    pub bracket: Arc<dyn BracketClient>,
    pub platform: Arc<dyn Platform>,
    pub store: Store,
}

/// The ordered stages of one reconciliation pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Participants,
    Matches,
    Launch,
    Afk,
    Cleanup,
    Streams,
    Persist,
}

impl Stage {
    const AFTER_LAUNCH: &'static [Stage] = &[Stage::Afk, Stage::Cleanup, Stage::Streams];
    const AFTER_CLEANUP: &'static [Stage] = &[Stage::Streams];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Participants => write!(f, "refresh participants"),
            Self::Matches => write!(f, "refresh matches"),
            Self::Launch => write!(f, "launch matches"),
            Self::Afk => write!(f, "AFK detection"),
            Self::Cleanup => write!(f, "venue cleanup"),
            Self::Streams => write!(f, "stream assignment"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// What one pass did, for the operator and the logs.
#[derive(Debug, Default)]
pub struct TickReport {
    pub participants_added: usize,
    pub participants_dropped: usize,
    pub matches_added: usize,
    pub matches_finished: usize,
    pub launched: usize,
    pub flagged_afk: usize,
    pub venues_deleted: usize,
    pub streams_assigned: usize,
    /// Stages skipped this pass, with the reason; retried next tick.
    pub skipped: Vec<(Stage, String)>,
}

impl TickReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, stage: Stage, reason: &impl fmt::Display) {
        warn!("{stage} skipped: {reason}");
        self.skipped.push((stage, reason.to_string()));
    }

    /// A transient failure abandons the rest of the pass; only the
    /// persist stage still runs, with whatever progress was made.
    fn skip_rest(&mut self, failed: Stage, rest: &'static [Stage], reason: &impl fmt::Display) {
        self.skip(failed, reason);
        for stage in rest {
            self.skipped
                .push((*stage, format!("skipped after {failed} failed")));
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{}/-{} participants, {} new matches, {} finished, {} launched, {} AFK, {} venues deleted, {} streamed, {} stages skipped",
            self.participants_added,
            self.participants_dropped,
            self.matches_added,
            self.matches_finished,
            self.launched,
            self.flagged_afk,
            self.venues_deleted,
            self.streams_assigned,
            self.skipped.len()
        )
    }
}

/// A tick abort. The loop task stops itself on this; an operator has to
/// resume after investigating.
#[derive(Debug, Error)]
#[error("tick aborted at {stage}: {cause}")]
pub struct TickError {
    pub stage: Stage,
    pub cause: anyhow::Error,
}

/// One reconciliation pass over the aggregate.
///
/// Stages run in a fixed order. A transient external failure skips the
/// remaining stages but still persists the partial progress; anything
/// unclassified aborts the pass without persisting. Both call sites (the
/// scheduled loop and the manual run-once path) hold the same per-tenant
/// guard, so two passes never overlap for one tenant.
///
/// # Errors
///
/// [`TickError`] on an abort.
pub fn tick(tournament: &mut Tournament, services: &Services) -> Result<TickReport, TickError> {
    let mut report = TickReport::default();
    let now = Utc::now();

    match services.bracket.fetch(&tournament.id) {
        Ok(remote) => {
            refresh_participants(tournament, &remote, &mut report);
            refresh_matches(tournament, &remote, now, &mut report);

            match launch_matches(tournament, services, now, &mut report) {
                Ok(()) => {
                    detect_afk(tournament, now, &mut report);

                    match cleanup_venues(tournament, services, now, &mut report) {
                        Ok(()) => assign_streams(tournament, &mut report),
                        Err(StageError::Transient(cause)) => {
                            report.skip_rest(Stage::Cleanup, Stage::AFTER_CLEANUP, &cause);
                        }
                        Err(StageError::Fatal(cause)) => {
                            return Err(TickError {
                                stage: Stage::Cleanup,
                                cause,
                            });
                        }
                    }
                }
                Err(StageError::Transient(cause)) => {
                    report.skip_rest(Stage::Launch, Stage::AFTER_LAUNCH, &cause);
                }
                Err(StageError::Fatal(cause)) => {
                    return Err(TickError {
                        stage: Stage::Launch,
                        cause,
                    });
                }
            }
        }
        Err(err) if err.is_transient() => {
            report.skip(Stage::Participants, &err);
            report.skip_rest(
                Stage::Matches,
                &[Stage::Launch, Stage::Afk, Stage::Cleanup, Stage::Streams],
                &err,
            );
        }
        Err(err) => {
            return Err(TickError {
                stage: Stage::Participants,
                cause: err.into(),
            });
        }
    }

    let snapshot = tournament.snapshot();
    if let Err(cause) = services.store.set(tournament.tenant, Some(&snapshot)) {
        return Err(TickError {
            stage: Stage::Persist,
            cause,
        });
    }

    Ok(report)
}

enum StageError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl From<PlatformError> for StageError {
    fn from(err: PlatformError) -> Self {
        if err.is_transient() {
            Self::Transient(err.into())
        } else {
            Self::Fatal(err.into())
        }
    }
}

fn refresh_participants(
    tournament: &mut Tournament,
    remote: &RemoteTournament,
    report: &mut TickReport,
) {
    for participant in &remote.participants {
        if tournament.add_participant(Participant::new(
            participant.player,
            participant.name.clone(),
        )) {
            debug!("[tenant {}] joined: {}", tournament.tenant, participant.name);
            report.participants_added += 1;
        }
    }

    let before = tournament.participants.len();
    tournament
        .participants
        .retain(|local| remote.participants.iter().any(|r| r.player == local.player));
    report.participants_dropped += before - tournament.participants.len();
}

fn refresh_matches(
    tournament: &mut Tournament,
    remote: &RemoteTournament,
    now: DateTime<Utc>,
    report: &mut TickReport,
) {
    // Pairings the bracket no longer reports were never launched here
    // or belong to a reset bracket; drop the unlaunched ones.
    let before = tournament.matches.len();
    tournament.matches.retain(|local| {
        local.state != MatchState::Pending || remote.matches.iter().any(|r| r.id == local.id)
    });
    if tournament.matches.len() < before {
        debug!(
            "[tenant {}] dropped {} stale pending matches",
            tournament.tenant,
            before - tournament.matches.len()
        );
    }

    for remote_match in &remote.matches {
        match remote_match.state {
            RemoteMatchState::Pending => {}
            RemoteMatchState::Open => {
                if tournament.match_by_id(remote_match.id).is_none() {
                    let mut game_match = Match::new(
                        remote_match.id,
                        remote_match.round,
                        remote_match.player1,
                        remote_match.player2,
                    );
                    game_match.touch(now);
                    tournament.matches.push(game_match);
                    report.matches_added += 1;
                }
            }
            RemoteMatchState::Complete => {
                for game_match in &mut tournament.matches {
                    if game_match.id == remote_match.id
                        && game_match.state != MatchState::Finished
                    {
                        game_match.state = MatchState::Finished;
                        game_match.on_stream = false;
                        game_match.touch(now);
                        report.matches_finished += 1;
                    }
                }
            }
        }
    }
}

fn launch_matches(
    tournament: &mut Tournament,
    services: &Services,
    now: DateTime<Utc>,
    report: &mut TickReport,
) -> Result<(), StageError> {
    let tenant = tournament.tenant;
    let id = tournament.id.clone();
    let present: Vec<PlayerRef> = tournament.participants.iter().map(|p| p.player).collect();

    for game_match in &mut tournament.matches {
        if game_match.state != MatchState::Pending {
            continue;
        }

        if !present.contains(&game_match.player1) || !present.contains(&game_match.player2) {
            debug!("[tenant {tenant}] {game_match} waiting on missing players");
            continue;
        }

        let venue = services.platform.create_venue(game_match)?;
        game_match.venue = Some(venue);
        game_match.state = MatchState::Ongoing;
        game_match.touch(now);
        report.launched += 1;
        debug!("[tenant {tenant}] launched {game_match} in {venue}");

        // Advisory write-back; the launch stands either way.
        if let Err(err) = services.bracket.mark_underway(&id, game_match.id) {
            warn!("[tenant {tenant}] mark underway failed for {game_match}: {err}");
        }
    }

    Ok(())
}

fn detect_afk(tournament: &mut Tournament, now: DateTime<Utc>, report: &mut TickReport) {
    let threshold = TimeDelta::seconds(tournament.config.afk_threshold_seconds);

    for game_match in &mut tournament.matches {
        if game_match.state == MatchState::Ongoing
            && game_match.afk_check
            && game_match.idle_for(now) > threshold
        {
            warn!("[tenant {}] {game_match} flagged AFK", tournament.tenant);
            game_match.state = MatchState::FlaggedAfk;
            game_match.on_stream = false;
            report.flagged_afk += 1;
        }
    }
}

fn cleanup_venues(
    tournament: &mut Tournament,
    services: &Services,
    now: DateTime<Utc>,
    report: &mut TickReport,
) -> Result<(), StageError> {
    let grace = TimeDelta::seconds(tournament.config.venue_grace_seconds);

    for game_match in &mut tournament.matches {
        if game_match.state != MatchState::Finished || game_match.idle_for(now) <= grace {
            continue;
        }

        let Some(venue) = game_match.venue else {
            continue;
        };

        match services.platform.delete_venue(venue) {
            Ok(()) => {
                game_match.venue = None;
                report.venues_deleted += 1;
            }
            // Deleted externally; already what we wanted.
            Err(err) if err.is_gone() => {
                game_match.venue = None;
                report.venues_deleted += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

fn assign_streams(tournament: &mut Tournament, report: &mut TickReport) {
    let capacity = tournament.config.stream_capacity;
    let mut streamed = tournament
        .matches
        .iter()
        .filter(|m| m.state == MatchState::Ongoing && m.on_stream)
        .count();

    for game_match in &mut tournament.matches {
        if streamed >= capacity {
            break;
        }

        if game_match.state == MatchState::Ongoing && !game_match.on_stream {
            game_match.on_stream = true;
            streamed += 1;
            report.streams_assigned += 1;
        }
    }
}
