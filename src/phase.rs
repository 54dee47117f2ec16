use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::OpError;

/// The coarse lifecycle state of a tournament.
///
/// It only moves forward on its own; rewinding is reserved to explicit
/// operator resets, which go through the same precondition gate as
/// everything else.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Phase {
    #[default]
    Pending,
    Registration,
    Checkin,
    AwaitingStart,
    Ongoing,
    Ended,
}

impl Phase {
    /// Every phase; for operations gated only on a live tournament.
    pub const ANY: &'static [Phase] = &[
        Phase::Pending,
        Phase::Registration,
        Phase::Checkin,
        Phase::AwaitingStart,
        Phase::Ongoing,
        Phase::Ended,
    ];

    /// Precondition gate evaluated at the top of every gated operation,
    /// before any mutation and before any external call.
    ///
    /// # Errors
    ///
    /// `PhaseMismatch` if the current phase is not in `allowed`.
    pub fn ensure(self, allowed: &'static [Phase]) -> Result<(), OpError> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(OpError::PhaseMismatch {
                current: self,
                allowed,
            })
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Registration => write!(f, "registration"),
            Self::Checkin => write!(f, "check-in"),
            Self::AwaitingStart => write!(f, "awaiting-start"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "register" | "registration" => Ok(Self::Registration),
            "checkin" | "check-in" => Ok(Self::Checkin),
            "awaiting-start" | "awaiting_start" => Ok(Self::AwaitingStart),
            "ongoing" => Ok(Self::Ongoing),
            "ended" => Ok(Self::Ended),
            _ => Err(anyhow::Error::msg(format!("invalid phase: {value}"))),
        }
    }
}

/// Renders an allowed-phase set for error messages.
#[must_use]
pub fn list(phases: &[Phase]) -> String {
    let phases: Vec<String> = phases.iter().map(ToString::to_string).collect();
    phases.join(", ")
}
