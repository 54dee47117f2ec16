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

#![allow(clippy::unwrap_used)]

use std::{
    collections::HashSet,
    fs,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{TimeDelta, Utc};

use bracket_warden::{
    TenantId,
    bracket::{
        BracketClient, BracketError, RemoteMatch, RemoteMatchState, RemoteParticipant,
        RemoteState, RemoteTournament,
    },
    config::Config,
    error::OpError,
    game_match::{Match, MatchState},
    manager::Manager,
    participant::Participant,
    phase::Phase,
    platform::{Platform, PlatformError, PlayerRef, RoleRef, VenueRef},
    reconcile::{Services, Stage},
    store::Store,
    task,
    tournament::Tournament,
};

const TENANT: TenantId = 100;
const BRACKET_ID: &str = "brk-weekly";

#[derive(Clone, Copy)]
enum FailMode {
    None,
    Transient,
    Permanent,
}

struct FakeBracket {
    remote: Mutex<RemoteTournament>,
    fetch_fail: Mutex<FailMode>,
    underway: Mutex<Vec<u64>>,
}

impl FakeBracket {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            remote: Mutex::new(RemoteTournament {
                id: BRACKET_ID.to_string(),
                name: "Weekly Smash".to_string(),
                participant_limit: Some(64),
                state: RemoteState::Underway,
                participants: Vec::new(),
                matches: Vec::new(),
            }),
            fetch_fail: Mutex::new(FailMode::None),
            underway: Mutex::new(Vec::new()),
        })
    }

    fn set_fetch_fail(&self, mode: FailMode) {
        *self.fetch_fail.lock().unwrap() = mode;
    }

    fn set_remote(&self, participants: Vec<RemoteParticipant>, matches: Vec<RemoteMatch>) {
        let mut remote = self.remote.lock().unwrap();
        remote.participants = participants;
        remote.matches = matches;
    }
}

impl BracketClient for FakeBracket {
    fn fetch(&self, _tournament: &str) -> Result<RemoteTournament, BracketError> {
        match *self.fetch_fail.lock().unwrap() {
            FailMode::None => Ok(self.remote.lock().unwrap().clone()),
            FailMode::Transient => Err(BracketError::Transient("rate limited".to_string())),
            FailMode::Permanent => Err(BracketError::Permanent("unknown tournament".to_string())),
        }
    }

    fn mark_underway(&self, _tournament: &str, match_id: u64) -> Result<(), BracketError> {
        self.underway.lock().unwrap().push(match_id);
        Ok(())
    }
}

struct FakePlatform {
    next_venue: AtomicU64,
    create_fail: Mutex<FailMode>,
    deleted: Mutex<Vec<VenueRef>>,
    refuse_delete: Mutex<HashSet<u64>>,
    revoked: Mutex<Vec<(PlayerRef, RoleRef)>>,
    refuse_revoke: Mutex<HashSet<u64>>,
}

impl FakePlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_venue: AtomicU64::new(1),
            create_fail: Mutex::new(FailMode::None),
            deleted: Mutex::new(Vec::new()),
            refuse_delete: Mutex::new(HashSet::new()),
            revoked: Mutex::new(Vec::new()),
            refuse_revoke: Mutex::new(HashSet::new()),
        })
    }
}

impl Platform for FakePlatform {
    fn create_venue(&self, _game_match: &Match) -> Result<VenueRef, PlatformError> {
        match *self.create_fail.lock().unwrap() {
            FailMode::None => Ok(VenueRef(self.next_venue.fetch_add(1, Ordering::SeqCst))),
            FailMode::Transient => Err(PlatformError::Unavailable("rate limited".to_string())),
            FailMode::Permanent => Err(PlatformError::Refused("no permission".to_string())),
        }
    }

    fn delete_venue(&self, venue: VenueRef) -> Result<(), PlatformError> {
        if self.refuse_delete.lock().unwrap().contains(&venue.0) {
            return Err(PlatformError::Refused("no permission".to_string()));
        }

        self.deleted.lock().unwrap().push(venue);
        Ok(())
    }

    fn grant_role(&self, _player: PlayerRef, _role: RoleRef) -> Result<(), PlatformError> {
        Ok(())
    }

    fn revoke_role(&self, player: PlayerRef, role: RoleRef) -> Result<(), PlatformError> {
        if self.refuse_revoke.lock().unwrap().contains(&player.0) {
            return Err(PlatformError::Refused("member left".to_string()));
        }

        self.revoked.lock().unwrap().push((player, role));
        Ok(())
    }
}

struct Harness {
    manager: Manager,
    bracket: Arc<FakeBracket>,
    platform: Arc<FakePlatform>,
}

impl Harness {
    fn new(test: &str) -> Self {
        let dir = std::env::temp_dir()
            .join("bracket-warden-manager-tests")
            .join(test);
        let _ = fs::remove_dir_all(&dir);

        let bracket = FakeBracket::new();
        let platform = FakePlatform::new();
        let services = Services {
            bracket: Arc::clone(&bracket) as Arc<dyn BracketClient>,
            platform: Arc::clone(&platform) as Arc<dyn Platform>,
            store: Store::open(dir).unwrap(),
        };

        Self {
            manager: Manager::new(services),
            bracket,
            platform,
        }
    }

    fn store(&self) -> &Store {
        &self.manager.services().store
    }

    /// Registers a tournament directly, the way the (out of crate)
    /// setup flow would. The loop is not started.
    fn seed(&self, phase: Phase) -> task::SharedTournament {
        let mut tournament = Tournament::new(
            TENANT,
            BRACKET_ID.to_string(),
            "Weekly Smash".to_string(),
            Config {
                // long enough that a running loop never ticks mid-test
                tick_seconds: 120,
                afk_threshold_seconds: 300,
                venue_grace_seconds: 300,
                stream_capacity: 1,
            },
        );
        tournament.phase = phase;

        self.manager.registry().register(tournament).unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

fn remote_participant(id: u64, name: &str) -> RemoteParticipant {
    RemoteParticipant {
        player: PlayerRef(id),
        name: name.to_string(),
    }
}

fn remote_match(id: u64, player1: u64, player2: u64, state: RemoteMatchState) -> RemoteMatch {
    RemoteMatch {
        id,
        round: 1,
        player1: PlayerRef(player1),
        player2: PlayerRef(player2),
        state,
    }
}

#[test]
fn one_live_tournament_per_tenant() {
    let harness = Harness::new("one-per-tenant");
    let shared = harness.seed(Phase::Registration);

    assert!(matches!(
        harness.manager.registry().register(Tournament::new(
            TENANT,
            BRACKET_ID.to_string(),
            "Second".to_string(),
            Config::default(),
        )),
        Err(OpError::AlreadyRegistered)
    ));

    harness
        .store()
        .set(TENANT, Some(&task::lock(&shared).snapshot()))
        .unwrap();
    assert!(matches!(
        harness.manager.restore(TENANT),
        Err(OpError::AlreadyRegistered)
    ));
}

#[test]
fn hard_reset_leaves_the_empty_marker() {
    let harness = Harness::new("hard-reset");
    harness.seed(Phase::Ongoing);

    harness.manager.hard_reset(TENANT).unwrap();

    assert!(harness.manager.registry().is_empty());
    assert!(harness.store().get(TENANT).unwrap().is_none());
    assert!(matches!(
        harness.manager.restore(TENANT),
        Err(OpError::NothingToRestore)
    ));
}

#[test]
fn reload_preserves_state_and_restarts_the_loop() {
    let harness = Harness::new("reload");
    let shared = harness.seed(Phase::Ongoing);

    {
        let mut tournament = task::lock(&shared);
        tournament.add_participant(Participant::new(PlayerRef(1), "ada".to_string()));
        tournament.add_participant(Participant::new(PlayerRef(2), "grace".to_string()));
        tournament
            .matches
            .push(Match::new(11, 1, PlayerRef(1), PlayerRef(2)));
    }
    task::start_loop(&shared, harness.manager.services()).unwrap();

    harness.manager.reload(TENANT).unwrap();

    let shared = harness.manager.registry().require(TENANT).unwrap();
    let tournament = task::lock(&shared);
    assert_eq!(tournament.phase, Phase::Ongoing);
    assert_eq!(tournament.participants.len(), 2);
    assert_eq!(tournament.matches.len(), 1);
    assert!(tournament.task_running());
}

#[test]
fn failed_reload_leaves_the_tenant_unregistered_and_data_on_disk() {
    let harness = Harness::new("reload-lost");
    let shared = harness.seed(Phase::Registration);
    task::lock(&shared).add_participant(Participant::new(PlayerRef(1), "ada".to_string()));

    harness.bracket.set_fetch_fail(FailMode::Permanent);

    assert!(matches!(
        harness.manager.reload(TENANT),
        Err(OpError::ReloadLost(_))
    ));
    assert!(harness.manager.registry().get(TENANT).is_none());

    let snapshot = harness.store().get(TENANT).unwrap().unwrap();
    assert_eq!(snapshot.participants.len(), 1);

    // the remedy: plain restore once the bracket service answers again
    harness.bracket.set_fetch_fail(FailMode::None);
    harness.manager.restore(TENANT).unwrap();
    assert!(harness.manager.registry().get(TENANT).is_some());
}

#[test]
fn happy_tick_launches_matches_and_assigns_streams() {
    let harness = Harness::new("happy-tick");
    harness.seed(Phase::Ongoing);
    harness.bracket.set_remote(
        vec![
            remote_participant(1, "ada"),
            remote_participant(2, "grace"),
            remote_participant(3, "edsger"),
            remote_participant(4, "barbara"),
        ],
        vec![
            remote_match(11, 1, 2, RemoteMatchState::Open),
            remote_match(12, 3, 4, RemoteMatchState::Open),
            remote_match(13, 1, 3, RemoteMatchState::Pending),
        ],
    );

    let report = harness.manager.run_once(TENANT).unwrap();

    assert!(report.is_clean());
    assert_eq!(report.participants_added, 4);
    assert_eq!(report.matches_added, 2);
    assert_eq!(report.launched, 2);
    assert_eq!(report.streams_assigned, 1);
    assert_eq!(*harness.bracket.underway.lock().unwrap(), vec![11, 12]);

    let snapshot = harness.store().get(TENANT).unwrap().unwrap();
    assert_eq!(snapshot.participants.len(), 4);
    assert_eq!(snapshot.matches.len(), 2);
    assert!(
        snapshot
            .matches
            .iter()
            .all(|m| m.state == MatchState::Ongoing && m.venue.is_some())
    );
    assert_eq!(snapshot.matches.iter().filter(|m| m.on_stream).count(), 1);
}

#[test]
fn transient_launch_failure_skips_later_stages_but_persists() {
    let harness = Harness::new("transient-launch");
    harness.seed(Phase::Ongoing);
    harness.bracket.set_remote(
        vec![remote_participant(1, "ada"), remote_participant(2, "grace")],
        vec![remote_match(11, 1, 2, RemoteMatchState::Open)],
    );
    *harness.platform.create_fail.lock().unwrap() = FailMode::Transient;

    let report = harness.manager.run_once(TENANT).unwrap();

    // stages 1 and 2 applied, launch and everything after it skipped
    assert_eq!(report.participants_added, 2);
    assert_eq!(report.matches_added, 1);
    assert_eq!(report.launched, 0);
    let skipped: Vec<Stage> = report.skipped.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(
        skipped,
        vec![Stage::Launch, Stage::Afk, Stage::Cleanup, Stage::Streams]
    );

    // persistence still ran, with the partial progress
    let snapshot = harness.store().get(TENANT).unwrap().unwrap();
    assert_eq!(snapshot.participants.len(), 2);
    assert_eq!(snapshot.matches.len(), 1);
    assert_eq!(snapshot.matches[0].state, MatchState::Pending);
}

#[test]
fn fatal_tick_error_aborts_without_persisting() {
    let harness = Harness::new("fatal-tick");
    let shared = harness.seed(Phase::Ongoing);
    let seeded = task::lock(&shared).snapshot();
    harness.store().set(TENANT, Some(&seeded)).unwrap();

    harness.bracket.set_fetch_fail(FailMode::Permanent);

    assert!(matches!(
        harness.manager.run_once(TENANT),
        Err(OpError::TickFailed(_))
    ));
    assert_eq!(harness.store().get(TENANT).unwrap(), Some(seeded));
}

#[test]
fn reset_matches_counts_failed_venue_deletions() {
    let harness = Harness::new("reset-matches");
    let shared = harness.seed(Phase::Ongoing);

    {
        let mut tournament = task::lock(&shared);
        tournament.add_participant(Participant::new(PlayerRef(1), "ada".to_string()));

        for id in 1..=5 {
            let mut game_match = Match::new(id, 1, PlayerRef(id), PlayerRef(id + 10));
            if id <= 3 {
                game_match.venue = Some(VenueRef(id));
                game_match.state = MatchState::Ongoing;
            }
            tournament.matches.push(game_match);
        }
    }
    harness.platform.refuse_delete.lock().unwrap().insert(2);

    let failed = harness.manager.reset_matches(TENANT, true).unwrap();

    assert_eq!(failed, 1);
    assert_eq!(
        *harness.platform.deleted.lock().unwrap(),
        vec![VenueRef(1), VenueRef(3)]
    );

    let tournament = task::lock(&shared);
    assert!(tournament.matches.is_empty());
    assert!(tournament.participants.is_empty());
}

#[test]
fn reset_participants_is_gated_and_counts_failed_revocations() {
    let harness = Harness::new("reset-participants");
    let shared = harness.seed(Phase::Ongoing);

    assert!(matches!(
        harness.manager.reset_participants(TENANT, false),
        Err(OpError::PhaseMismatch { .. })
    ));

    {
        let mut tournament = task::lock(&shared);
        tournament.phase = Phase::Checkin;

        for id in 1..=3 {
            let mut participant = Participant::new(PlayerRef(id), format!("player-{id}"));
            participant.role = Some(RoleRef(50));
            tournament.participants.push(participant);
        }
    }
    harness.platform.refuse_revoke.lock().unwrap().insert(3);

    let failed = harness.manager.reset_participants(TENANT, true).unwrap();

    assert_eq!(failed, 1);
    assert_eq!(harness.platform.revoked.lock().unwrap().len(), 2);
    assert!(task::lock(&shared).participants.is_empty());
}

#[test]
fn pause_disables_afk_flagging_until_resumed() {
    let harness = Harness::new("pause-afk");
    let shared = harness.seed(Phase::Ongoing);

    {
        let mut tournament = task::lock(&shared);
        tournament.add_participant(Participant::new(PlayerRef(1), "ada".to_string()));
        tournament.add_participant(Participant::new(PlayerRef(2), "grace".to_string()));
        tournament.add_participant(Participant::new(PlayerRef(3), "edsger".to_string()));
        tournament.add_participant(Participant::new(PlayerRef(4), "barbara".to_string()));

        for (id, p1, p2) in [(11, 1, 2), (12, 3, 4)] {
            let mut game_match = Match::new(id, 1, PlayerRef(p1), PlayerRef(p2));
            game_match.state = MatchState::Ongoing;
            game_match.venue = Some(VenueRef(id));
            tournament.matches.push(game_match);
        }
    }
    harness.bracket.set_remote(
        vec![
            remote_participant(1, "ada"),
            remote_participant(2, "grace"),
            remote_participant(3, "edsger"),
            remote_participant(4, "barbara"),
        ],
        vec![
            remote_match(11, 1, 2, RemoteMatchState::Open),
            remote_match(12, 3, 4, RemoteMatchState::Open),
        ],
    );
    task::start_loop(&shared, harness.manager.services()).unwrap();

    let disabled = harness.manager.pause(TENANT).unwrap();
    assert_eq!(disabled, 2);
    assert!(!task::lock(&shared).task_running());

    // push both matches far past the inactivity threshold
    {
        let mut tournament = task::lock(&shared);
        let long_ago = Utc::now() - TimeDelta::seconds(3600);
        for game_match in &mut tournament.matches {
            game_match.last_activity = long_ago;
        }
    }

    let report = harness.manager.run_once(TENANT).unwrap();

    assert_eq!(report.flagged_afk, 0);
    let tournament = task::lock(&shared);
    assert!(
        tournament
            .matches
            .iter()
            .all(|m| m.state == MatchState::Ongoing)
    );
}

#[test]
fn afk_detection_flags_idle_matches() {
    let harness = Harness::new("afk-flagging");
    let shared = harness.seed(Phase::Ongoing);

    {
        let mut tournament = task::lock(&shared);
        tournament.add_participant(Participant::new(PlayerRef(1), "ada".to_string()));
        tournament.add_participant(Participant::new(PlayerRef(2), "grace".to_string()));

        let mut game_match = Match::new(11, 1, PlayerRef(1), PlayerRef(2));
        game_match.state = MatchState::Ongoing;
        game_match.on_stream = true;
        game_match.last_activity = Utc::now() - TimeDelta::seconds(3600);
        tournament.matches.push(game_match);
    }
    harness.bracket.set_remote(
        vec![remote_participant(1, "ada"), remote_participant(2, "grace")],
        vec![remote_match(11, 1, 2, RemoteMatchState::Open)],
    );

    let report = harness.manager.run_once(TENANT).unwrap();

    assert_eq!(report.flagged_afk, 1);
    let tournament = task::lock(&shared);
    assert_eq!(tournament.matches[0].state, MatchState::FlaggedAfk);
    assert!(!tournament.matches[0].on_stream);
}

#[test]
fn finished_matches_lose_their_venue_after_the_grace_period() {
    let harness = Harness::new("venue-cleanup");
    let shared = harness.seed(Phase::Ongoing);

    {
        let mut tournament = task::lock(&shared);
        tournament.add_participant(Participant::new(PlayerRef(1), "ada".to_string()));
        tournament.add_participant(Participant::new(PlayerRef(2), "grace".to_string()));

        let mut game_match = Match::new(11, 1, PlayerRef(1), PlayerRef(2));
        game_match.state = MatchState::Finished;
        game_match.venue = Some(VenueRef(7));
        game_match.last_activity = Utc::now() - TimeDelta::seconds(3600);
        tournament.matches.push(game_match);
    }
    harness.bracket.set_remote(
        vec![remote_participant(1, "ada"), remote_participant(2, "grace")],
        vec![remote_match(11, 1, 2, RemoteMatchState::Complete)],
    );

    let report = harness.manager.run_once(TENANT).unwrap();

    assert_eq!(report.venues_deleted, 1);
    assert_eq!(*harness.platform.deleted.lock().unwrap(), vec![VenueRef(7)]);
    assert!(task::lock(&shared).matches[0].venue.is_none());
}

#[test]
fn resume_dry_run_failure_keeps_the_loop_stopped() {
    let harness = Harness::new("resume-dry-run");
    let shared = harness.seed(Phase::Ongoing);
    harness.bracket.set_fetch_fail(FailMode::Permanent);

    assert!(matches!(
        harness.manager.resume(TENANT),
        Err(OpError::ResumeDryRunFailed(_))
    ));

    let tournament = task::lock(&shared);
    assert!(!tournament.task_running());
    assert_eq!(tournament.phase, Phase::Ongoing);
}

#[test]
fn pause_without_a_running_loop_is_reported() {
    let harness = Harness::new("pause-not-running");
    harness.seed(Phase::Ongoing);

    assert!(matches!(
        harness.manager.pause(TENANT),
        Err(OpError::LoopNotRunning)
    ));
}

#[test]
fn operations_without_a_tournament_are_rejected() {
    let harness = Harness::new("no-tournament");

    assert!(matches!(
        harness.manager.run_once(TENANT),
        Err(OpError::NoActiveTournament)
    ));
    assert!(matches!(
        harness.manager.reload(TENANT),
        Err(OpError::NoActiveTournament)
    ));
    assert!(matches!(
        harness.manager.refresh_metadata(TENANT),
        Err(OpError::NoActiveTournament)
    ));
}

#[test]
fn refresh_metadata_overwrites_name_and_limit_only() {
    let harness = Harness::new("refresh-metadata");
    let shared = harness.seed(Phase::Checkin);

    {
        let mut tournament = task::lock(&shared);
        tournament.name = "stale name".to_string();
        tournament.add_participant(Participant::new(PlayerRef(1), "ada".to_string()));
    }

    harness.manager.refresh_metadata(TENANT).unwrap();

    let tournament = task::lock(&shared);
    assert_eq!(tournament.name, "Weekly Smash");
    assert_eq!(tournament.participant_limit, Some(64));
    assert_eq!(tournament.phase, Phase::Checkin);
    assert_eq!(tournament.participants.len(), 1);
}

#[test]
fn end_archives_and_unregisters() {
    let harness = Harness::new("end");
    let shared = harness.seed(Phase::Ongoing);
    task::lock(&shared).add_participant(Participant::new(PlayerRef(1), "ada".to_string()));

    harness.manager.end(TENANT).unwrap();

    assert!(harness.manager.registry().is_empty());
    assert!(harness.store().get(TENANT).unwrap().is_none());

    let archived = harness.store().archived().unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].phase, Phase::Ended);
    assert_eq!(archived[0].participants.len(), 1);
}

#[test]
fn startup_restores_every_saved_tenant() {
    let harness = Harness::new("startup");

    let ongoing = {
        let mut tournament = Tournament::new(
            1,
            BRACKET_ID.to_string(),
            "Weekly Smash".to_string(),
            Config {
                tick_seconds: 120,
                ..Config::default()
            },
        );
        tournament.phase = Phase::Ongoing;
        tournament.snapshot()
    };
    let registering = {
        let mut tournament = Tournament::new(
            2,
            BRACKET_ID.to_string(),
            "Weekly Smash".to_string(),
            Config::default(),
        );
        tournament.phase = Phase::Registration;
        tournament.snapshot()
    };

    harness.store().set(1, Some(&ongoing)).unwrap();
    harness.store().set(2, Some(&registering)).unwrap();
    harness.store().set(3, None).unwrap();

    let report = harness.manager.startup().unwrap();

    assert_eq!(report.0.len(), 3);
    assert_eq!(report.restored(), 2);
    assert_eq!(report.failed(), 0);

    let ongoing = harness.manager.registry().require(1).unwrap();
    assert!(task::lock(&ongoing).task_running());

    let registering = harness.manager.registry().require(2).unwrap();
    assert!(!task::lock(&registering).task_running());

    assert!(harness.manager.registry().get(3).is_none());
}
