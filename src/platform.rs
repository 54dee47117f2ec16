use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game_match::Match;

/// A player identity on the chat platform.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct PlayerRef(pub u64);

/// An ephemeral communication venue created for one match.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct VenueRef(pub u64);

/// An access role granted to participants for the tournament's duration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct RoleRef(pub u64);

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player {}", self.0)
    }
}

impl fmt::Display for VenueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "venue {}", self.0)
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role {}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The resource no longer exists. A dangling venue reference is
    /// treated as already deleted, never as a failure.
    #[error("the resource no longer exists")]
    Gone,

    #[error("the platform rejected the call: {0}")]
    Refused(String),

    #[error("the platform is temporarily unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone)
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Venue and role primitives, consumed only.
///
/// Every call fails on its own; callers never treat a batch of these as
/// all-or-nothing.
pub trait Platform: Send + Sync {
    /// # Errors
    ///
    /// If the venue cannot be created.
    fn create_venue(&self, game_match: &Match) -> Result<VenueRef, PlatformError>;

    /// # Errors
    ///
    /// `Gone` if the venue was already deleted externally.
    fn delete_venue(&self, venue: VenueRef) -> Result<(), PlatformError>;

    /// # Errors
    ///
    /// If the role cannot be granted.
    fn grant_role(&self, player: PlayerRef, role: RoleRef) -> Result<(), PlatformError>;

    /// # Errors
    ///
    /// `Gone` if the role or member no longer exists.
    fn revoke_role(&self, player: PlayerRef, role: RoleRef) -> Result<(), PlatformError>;
}
