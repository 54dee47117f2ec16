use thiserror::Error;

use crate::{phase, phase::Phase, reconcile::TickError};

/// The result taxonomy of the operator-facing operations.
///
/// Precondition violations (`NoActiveTournament`, `PhaseMismatch`) are
/// raised before any mutation or external call. The recovery variants
/// carry the cause so the command layer can show operators something
/// diagnosable.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("no tournament is set up for this tenant")]
    NoActiveTournament,

    #[error("a tournament is already set up for this tenant")]
    AlreadyRegistered,

    #[error("the tournament is {}, this operation needs: {}", .current, phase::list(.allowed))]
    PhaseMismatch {
        current: Phase,
        allowed: &'static [Phase],
    },

    #[error("no saved tournament on disk")]
    NothingToRestore,

    /// The snapshot stayed on disk; `restore` can be retried.
    #[error("could not rebuild the tournament from disk: {0}")]
    RestoreFailed(anyhow::Error),

    /// The tournament was unloaded from memory but rebuilding it failed.
    /// The snapshot stayed on disk; `restore` is the remedy.
    #[error("the tournament was unloaded, but could not be rebuilt: {0}")]
    ReloadLost(anyhow::Error),

    #[error("bracket sync failed: {0}")]
    SyncFailed(anyhow::Error),

    #[error("store: {0}")]
    Store(anyhow::Error),

    #[error("the loop task is not running")]
    LoopNotRunning,

    #[error("the loop task is already running")]
    LoopAlreadyRunning,

    /// Raised when a phase change is attempted under a live loop task.
    #[error("the loop task is still running")]
    LoopStillRunning,

    /// The loop stays stopped; the tournament is never left with a task
    /// silently not scheduled while reporting success.
    #[error("the dry run before resuming failed: {0}")]
    ResumeDryRunFailed(TickError),

    #[error("the reconciliation pass failed: {0}")]
    TickFailed(TickError),
}
