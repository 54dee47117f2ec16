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

use log::{error, info, warn};

use crate::{
    TenantId,
    error::OpError,
    phase::Phase,
    platform::{PlayerRef, RoleRef, VenueRef},
    reconcile::{self, Services, TickReport},
    registry::Registry,
    task,
    tournament::{Tournament, TournamentSerialized},
};

/// The composition root: the registry, the collaborators, and every
/// operator-facing operation.
///
/// Each operation evaluates its phase gate under the tenant's guard
/// before touching anything, so a rejected call has no side effect, and
/// a permitted one can never interleave with a reconciliation pass.
pub struct Manager {
    registry: Registry,
    services: Services,
}

/// Per-tenant outcome of startup reconstruction.
#[derive(Debug)]
pub enum StartupOutcome {
    Restored,
    NothingSaved,
    Failed(OpError),
}

#[derive(Debug, Default)]
pub struct StartupReport(pub Vec<(TenantId, StartupOutcome)>);

impl StartupReport {
    #[must_use]
    pub fn restored(&self) -> usize {
        self.0
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StartupOutcome::Restored))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.0
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StartupOutcome::Failed(_)))
            .count()
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tenants: {} restored, {} failed",
            self.0.len(),
            self.restored(),
            self.failed()
        )
    }
}

impl Manager {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            registry: Registry::new(),
            services,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Reconstructs every tenant found in the store. One tenant failing
    /// never aborts the others.
    ///
    /// # Errors
    ///
    /// If the store itself cannot be listed.
    pub fn startup(&self) -> anyhow::Result<StartupReport> {
        let mut report = StartupReport::default();

        for tenant in self.services.store.tenants()? {
            let outcome = match self.restore(tenant) {
                Ok(()) => StartupOutcome::Restored,
                Err(OpError::NothingToRestore) => StartupOutcome::NothingSaved,
                Err(err) => {
                    error!("[tenant {tenant}] startup restore failed: {err}");
                    StartupOutcome::Failed(err)
                }
            };
            report.0.push((tenant, outcome));
        }

        info!("startup: {report}");
        Ok(report)
    }

    /// Stops every loop cooperatively and persists every aggregate.
    pub fn shutdown(&self) {
        for tenant in self.registry.tenants() {
            let Some(shared) = self.registry.remove(tenant) else {
                continue;
            };

            let _stopped = task::stop_loop(&shared);

            let tournament = task::lock(&shared);
            if let Err(err) = self
                .services
                .store
                .set(tenant, Some(&tournament.snapshot()))
            {
                error!("[tenant {tenant}] save on shutdown failed: {err}");
            } else {
                info!("[tenant {tenant}] saved {tournament}");
            }
        }
    }

    /// Rebuilds a lost tournament from its snapshot and registers it;
    /// if it was ongoing, its loop starts again.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if the tenant has a live tournament,
    /// `NothingToRestore` if the store holds the empty marker, or
    /// `RestoreFailed` if rebuilding broke — the tenant stays
    /// unregistered and the snapshot stays on disk.
    pub fn restore(&self, tenant: TenantId) -> Result<(), OpError> {
        if self.registry.get(tenant).is_some() {
            return Err(OpError::AlreadyRegistered);
        }

        let snapshot = self
            .services
            .store
            .get(tenant)
            .map_err(OpError::Store)?
            .ok_or(OpError::NothingToRestore)?;

        let tournament = self.rebuild(tenant, snapshot).map_err(OpError::RestoreFailed)?;
        let phase = tournament.phase;
        let shared = self.registry.register(tournament)?;

        if phase == Phase::Ongoing {
            task::start_loop(&shared, &self.services)?;
        }

        info!("[tenant {tenant}] tournament restored from disk ({phase})");
        Ok(())
    }

    fn rebuild(&self, tenant: TenantId, snapshot: TournamentSerialized) -> anyhow::Result<Tournament> {
        let mut tournament = Tournament::from(snapshot);
        tournament.tenant = tenant;

        // External sync: the bracket service still has to know this
        // tournament, and it owns the metadata.
        let remote = self
            .services
            .bracket
            .fetch(&tournament.id)
            .map_err(anyhow::Error::from)?;
        tournament.name = remote.name;
        tournament.participant_limit = remote.participant_limit;

        Ok(tournament)
    }

    /// Saves, unloads, and restores a tenant's tournament.
    ///
    /// The aggregate is removed before the rebuild is attempted, so a
    /// rebuild failure leaves the tenant unregistered with its data safe
    /// on disk; that state is reported as `ReloadLost` and `restore` is
    /// the remedy.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `Store`, or `ReloadLost`.
    pub fn reload(&self, tenant: TenantId) -> Result<(), OpError> {
        let shared = self.registry.require(tenant)?;

        {
            let tournament = task::lock(&shared);
            self.services
                .store
                .set(tenant, Some(&tournament.snapshot()))
                .map_err(OpError::Store)?;
        }

        let _stopped = task::stop_loop(&shared);
        self.registry.remove(tenant);

        self.restore(tenant).map_err(|err| match err {
            OpError::RestoreFailed(cause) | OpError::Store(cause) => OpError::ReloadLost(cause),
            other => other,
        })?;

        info!("[tenant {tenant}] tournament reloaded");
        Ok(())
    }

    /// Wipes the tenant's tournament from memory and leaves the empty
    /// marker on disk. No bracket-service calls, no venue or role
    /// deletions: the last resort when the aggregate itself is broken.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament` or `Store`.
    pub fn hard_reset(&self, tenant: TenantId) -> Result<(), OpError> {
        let shared = self.registry.require(tenant)?;

        let _stopped = task::stop_loop(&shared);
        self.registry.remove(tenant);
        self.services.store.set(tenant, None).map_err(OpError::Store)?;

        warn!("[tenant {tenant}] hard reset, memory and disk wiped");
        Ok(())
    }

    /// Clears matches and participants so the loop can rebuild them
    /// from the bracket. Optionally deletes the venues that were
    /// attached; each failed deletion is counted, never fatal.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `PhaseMismatch` (needs `ongoing`), or
    /// `Store`.
    pub fn reset_matches(&self, tenant: TenantId, delete_venues: bool) -> Result<usize, OpError> {
        let shared = self.registry.require(tenant)?;

        let venues: Vec<VenueRef> = {
            let mut tournament = task::lock(&shared);
            tournament.phase.ensure(&[Phase::Ongoing])?;

            let venues = if delete_venues {
                tournament.matches.iter().filter_map(|m| m.venue).collect()
            } else {
                Vec::new()
            };

            tournament.matches.clear();
            tournament.participants.clear();
            self.services
                .store
                .set(tenant, Some(&tournament.snapshot()))
                .map_err(OpError::Store)?;

            venues
        };

        let mut failed = 0;
        for venue in venues {
            match self.services.platform.delete_venue(venue) {
                Ok(()) => {}
                Err(err) if err.is_gone() => {}
                Err(err) => {
                    warn!("[tenant {tenant}] could not delete {venue}: {err}");
                    failed += 1;
                }
            }
        }

        info!("[tenant {tenant}] matches reset, {failed} venue deletions failed");
        Ok(failed)
    }

    /// Clears the participant list during sign-ups. Optionally revokes
    /// each participant's access role; failures are counted, never
    /// fatal.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `PhaseMismatch` (needs `registration` or
    /// `check-in`), or `Store`.
    pub fn reset_participants(
        &self,
        tenant: TenantId,
        remove_roles: bool,
    ) -> Result<usize, OpError> {
        let shared = self.registry.require(tenant)?;

        let roles: Vec<(PlayerRef, RoleRef)> = {
            let mut tournament = task::lock(&shared);
            tournament
                .phase
                .ensure(&[Phase::Registration, Phase::Checkin])?;

            let roles = if remove_roles {
                tournament
                    .participants
                    .iter()
                    .filter_map(|p| p.role.map(|role| (p.player, role)))
                    .collect()
            } else {
                Vec::new()
            };

            tournament.participants.clear();
            self.services
                .store
                .set(tenant, Some(&tournament.snapshot()))
                .map_err(OpError::Store)?;

            roles
        };

        let mut failed = 0;
        for (player, role) in roles {
            match self.services.platform.revoke_role(player, role) {
                Ok(()) => {}
                Err(err) if err.is_gone() => {}
                Err(err) => {
                    warn!("[tenant {tenant}] could not revoke {role} from {player}: {err}");
                    failed += 1;
                }
            }
        }

        info!("[tenant {tenant}] participants reset, {failed} role revocations failed");
        Ok(failed)
    }

    /// Re-fetches the name and participant limit from the bracket
    /// service. Everything else stays untouched.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `SyncFailed`, or `Store`.
    pub fn refresh_metadata(&self, tenant: TenantId) -> Result<(), OpError> {
        let shared = self.registry.require(tenant)?;

        let id = {
            let tournament = task::lock(&shared);
            tournament.id.clone()
        };

        let remote = self
            .services
            .bracket
            .fetch(&id)
            .map_err(|err| OpError::SyncFailed(err.into()))?;

        let mut tournament = task::lock(&shared);
        tournament.name = remote.name;
        tournament.participant_limit = remote.participant_limit;
        self.services
            .store
            .set(tenant, Some(&tournament.snapshot()))
            .map_err(OpError::Store)?;

        info!("[tenant {tenant}] metadata refreshed: {tournament}");
        Ok(())
    }

    /// Stops the scheduled cadence without touching the aggregate. AFK
    /// flagging is disabled on every ongoing match first (and persisted)
    /// so nobody is flagged for the whole pause, restarts included.
    /// Returns how many matches had flagging disabled.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `PhaseMismatch` (needs `ongoing`),
    /// `LoopNotRunning`, or `Store`.
    pub fn pause(&self, tenant: TenantId) -> Result<usize, OpError> {
        let shared = self.registry.require(tenant)?;

        let disabled = {
            let mut tournament = task::lock(&shared);
            tournament.phase.ensure(&[Phase::Ongoing])?;

            if !tournament.task_running() {
                return Err(OpError::LoopNotRunning);
            }

            let disabled = tournament.disable_afk_checks();
            self.services
                .store
                .set(tenant, Some(&tournament.snapshot()))
                .map_err(OpError::Store)?;

            disabled
        };

        task::stop_loop(&shared)?;

        info!("[tenant {tenant}] loop task paused, AFK checks disabled on {disabled} matches");
        Ok(disabled)
    }

    /// Re-enables the scheduled cadence. The tick body is dry-run once
    /// first, under the same guard the scheduler uses; if that pass
    /// aborts, the tournament stays paused and the failure is returned.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `PhaseMismatch` (needs `ongoing`),
    /// `LoopAlreadyRunning`, or `ResumeDryRunFailed`.
    pub fn resume(&self, tenant: TenantId) -> Result<(), OpError> {
        let shared = self.registry.require(tenant)?;

        {
            let mut tournament = task::lock(&shared);
            tournament.phase.ensure(&[Phase::Ongoing])?;

            if tournament.task_running() {
                return Err(OpError::LoopAlreadyRunning);
            }

            reconcile::tick(&mut tournament, &self.services)
                .map_err(OpError::ResumeDryRunFailed)?;
        }

        task::start_loop(&shared, &self.services)?;

        info!("[tenant {tenant}] loop task resumed");
        Ok(())
    }

    /// Runs the tick body once, outside the schedule. Equivalent to one
    /// scheduled tick and serialized against them by the same guard.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `PhaseMismatch` (needs `ongoing`), or
    /// `TickFailed`.
    pub fn run_once(&self, tenant: TenantId) -> Result<TickReport, OpError> {
        let shared = self.registry.require(tenant)?;

        let mut tournament = task::lock(&shared);
        tournament.phase.ensure(&[Phase::Ongoing])?;

        reconcile::tick(&mut tournament, &self.services).map_err(OpError::TickFailed)
    }

    /// Closes the tournament: the loop stops, the final state goes to
    /// the archive, the store keeps the empty marker, and the tenant is
    /// unregistered. Bracket and platform resources are left as they
    /// are.
    ///
    /// # Errors
    ///
    /// `NoActiveTournament`, `PhaseMismatch` (needs `ongoing`), or
    /// `Store`.
    pub fn end(&self, tenant: TenantId) -> Result<(), OpError> {
        let shared = self.registry.require(tenant)?;

        {
            let tournament = task::lock(&shared);
            tournament.phase.ensure(&[Phase::Ongoing])?;
        }

        let _stopped = task::stop_loop(&shared);

        {
            let mut tournament = task::lock(&shared);

            // The phase only flips once the archive and marker are on
            // disk; until then the tournament is merely paused.
            let mut snapshot = tournament.snapshot();
            snapshot.phase = Phase::Ended;
            self.services
                .store
                .append_archive(&snapshot)
                .map_err(OpError::Store)?;
            self.services.store.set(tenant, None).map_err(OpError::Store)?;

            tournament.set_phase(Phase::Ended)?;
            info!("[tenant {tenant}] tournament ended: {tournament}");
        }

        self.registry.remove(tenant);
        Ok(())
    }
}
