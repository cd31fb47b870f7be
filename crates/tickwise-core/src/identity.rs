//! Identity types for networked entities and peers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a networked entity, shared by all peers in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Identifier for a participant in a session
///
/// The server always uses [`PeerId::SERVER`]; clients get non-zero IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The authoritative server
    pub const SERVER: PeerId = PeerId(0);

    /// Create a new peer ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Check if this is the server
    pub fn is_server(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_server() {
            write!(f, "peer:server")
        } else {
            write!(f, "peer:{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id() {
        let id = EntityId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(format!("{}", id), "entity:42");
    }

    #[test]
    fn test_peer_id() {
        assert!(PeerId::SERVER.is_server());
        assert!(!PeerId::new(3).is_server());
        assert_eq!(format!("{}", PeerId::SERVER), "peer:server");
        assert_eq!(format!("{}", PeerId::new(3)), "peer:3");
    }
}
