use std::fmt;

use serde::{Deserialize, Serialize};

use crate::platform::{PlayerRef, RoleRef};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Participant {
    pub player: PlayerRef,
    pub name: String,
    #[serde(default)]
    pub role: Option<RoleRef>,
    #[serde(default)]
    pub checked_in: bool,
}

impl Participant {
    #[must_use]
    pub fn new(player: PlayerRef, name: String) -> Self {
        Self {
            player,
            name,
            role: None,
            checked_in: false,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.checked_in {
            write!(f, "{} ({}) checked_in", self.name, self.player)
        } else {
            write!(f, "{} ({})", self.name, self.player)
        }
    }
}
