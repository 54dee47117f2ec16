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

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, error, info};

use crate::{
    TenantId,
    error::OpError,
    phase::Phase,
    reconcile::{self, Services},
    tournament::Tournament,
};

/// The aggregate as the registry hands it out. The mutex is the
/// per-tenant execution guard: it spans every whole tick and every
/// manual operation, so the two can never interleave for one tenant,
/// and one tenant's slow external call never blocks another's.
pub type SharedTournament = Arc<Mutex<Tournament>>;

/// Locks a tournament, recovering the state if a holder panicked.
pub fn lock(shared: &SharedTournament) -> MutexGuard<'_, Tournament> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle to one tournament's recurring loop thread.
///
/// Cancellation is cooperative: the stop flag is read at tick boundaries
/// only, so an in-flight tick always completes, persist stage included.
/// On a fatal tick error the thread raises the flag itself and exits;
/// the handle then reads as stopped until the next start joins it.
#[derive(Debug)]
pub struct LoopTask {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LoopTask {
    fn spawn(tenant: TenantId, shared: SharedTournament, services: Services, period: u64) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || run(tenant, &shared, &services, &flag, period));

        Self {
            stop,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _joined = handle.join();
        }
    }
}

/// Starts the loop task and stores its handle in the aggregate.
///
/// # Errors
///
/// `LoopAlreadyRunning` if a live task already owns this tournament.
pub fn start_loop(shared: &SharedTournament, services: &Services) -> Result<(), OpError> {
    let mut tournament = lock(shared);

    if tournament.task_running() {
        return Err(OpError::LoopAlreadyRunning);
    }

    // A task that stopped itself after a fatal tick; its thread is done
    // and never takes this lock again, so joining here cannot hang.
    if let Some(stale) = tournament.task.take() {
        stale.join();
    }

    let task = LoopTask::spawn(
        tournament.tenant,
        Arc::clone(shared),
        services.clone(),
        tournament.config.tick_seconds,
    );
    tournament.task = Some(task);

    Ok(())
}

/// Stops the loop task. The handle is taken out under the lock, then
/// signalled and joined without it, so an in-flight tick can finish.
///
/// # Errors
///
/// `LoopNotRunning` if there is no task to stop.
pub fn stop_loop(shared: &SharedTournament) -> Result<(), OpError> {
    let task = {
        let mut tournament = lock(shared);
        tournament.task.take()
    };

    match task {
        Some(task) => {
            task.request_stop();
            task.join();
            Ok(())
        }
        None => Err(OpError::LoopNotRunning),
    }
}

fn run(
    tenant: TenantId,
    shared: &SharedTournament,
    services: &Services,
    stop: &AtomicBool,
    period: u64,
) {
    info!("[tenant {tenant}] loop task started ({period}s period)");

    'ticking: loop {
        // Sleep in slices so a stop request does not wait a whole period.
        let mut slept = 0;
        while slept < period {
            if stop.load(Ordering::SeqCst) {
                break 'ticking;
            }

            thread::sleep(Duration::from_secs(1));
            slept += 1;
        }

        let mut tournament = lock(shared);

        // A stop may have landed while we waited for the guard.
        if stop.load(Ordering::SeqCst) {
            break;
        }

        if tournament.phase != Phase::Ongoing {
            info!("[tenant {tenant}] tournament is no longer ongoing, loop task leaving");
            stop.store(true, Ordering::SeqCst);
            break;
        }

        match reconcile::tick(&mut tournament, services) {
            Ok(report) => debug!("[tenant {tenant}] tick: {report}"),
            Err(err) => {
                error!("[tenant {tenant}] {err}; the loop task stops itself, resume after investigating");
                stop.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    info!("[tenant {tenant}] loop task stopped");
}
