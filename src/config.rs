use serde::{Deserialize, Serialize};

const TICK_SECONDS: u64 = 15;
const AFK_THRESHOLD_SECONDS: i64 = 300;
const VENUE_GRACE_SECONDS: i64 = 300;
const STREAM_CAPACITY: usize = 1;

/// Per-tournament tuning for the reconciliation loop.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Period of the recurring loop task.
    #[serde(default = "tick_seconds")]
    pub tick_seconds: u64,
    /// How long an ongoing match may sit without activity before it is
    /// flagged.
    #[serde(default = "afk_threshold_seconds")]
    pub afk_threshold_seconds: i64,
    /// How long a finished match keeps its venue.
    #[serde(default = "venue_grace_seconds")]
    pub venue_grace_seconds: i64,
    /// Spectator stream slots assignable at once.
    #[serde(default = "stream_capacity")]
    pub stream_capacity: usize,
}

fn tick_seconds() -> u64 {
    TICK_SECONDS
}

fn afk_threshold_seconds() -> i64 {
    AFK_THRESHOLD_SECONDS
}

fn venue_grace_seconds() -> i64 {
    VENUE_GRACE_SECONDS
}

fn stream_capacity() -> usize {
    STREAM_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_seconds: TICK_SECONDS,
            afk_threshold_seconds: AFK_THRESHOLD_SECONDS,
            venue_grace_seconds: VENUE_GRACE_SECONDS,
            stream_capacity: STREAM_CAPACITY,
        }
    }
}
