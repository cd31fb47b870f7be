//! Authority roles

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a peer is entitled to do with one entity
///
/// Per entity there is exactly one `Authoritative` peer (the server), at most
/// one `Predicting` peer (the owner), and everybody else is `Observing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AuthorityRole {
    /// Runs the definitive simulation and produces snapshots
    Authoritative,
    /// Simulates speculatively from local input; overwritten by snapshots
    Predicting,
    /// Applies snapshots only
    #[default]
    Observing,
}

impl AuthorityRole {
    /// Check if this role runs the simulation step each tick
    pub fn simulates(&self) -> bool {
        matches!(self, AuthorityRole::Authoritative | AuthorityRole::Predicting)
    }

    /// Check if this role may submit input for the entity
    pub fn submits_input(&self) -> bool {
        matches!(self, AuthorityRole::Predicting)
    }
}

impl fmt::Display for AuthorityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthorityRole::Authoritative => "authoritative",
            AuthorityRole::Predicting => "predicting",
            AuthorityRole::Observing => "observing",
        };
        f.write_str(name)
    }
}
