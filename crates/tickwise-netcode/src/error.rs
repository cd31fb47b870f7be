//! Error types for tickwise-netcode
//!
//! Only misuse and authority violations are errors. Lost or late messages,
//! stale snapshots and horizon overruns are ordinary outcomes and are
//! reported through return values and logs instead.

use crate::RpcTarget;
use thiserror::Error;
use tickwise_core::{EntityId, PeerId, Tick};

/// Netcode error type
#[derive(Debug, Error)]
pub enum Error {
    /// Only the authoritative peer may perform this operation
    #[error("{caller} is not authoritative")]
    NotAuthoritative { caller: PeerId },

    /// Entity is not registered
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Entity is already registered
    #[error("Entity {0} is already registered")]
    DuplicateEntity(EntityId),

    /// Input from a peer that does not hold the predicting role
    #[error("Input for {entity} from {sender} rejected, predicting holder is {holder:?}")]
    AuthorityViolation {
        entity: EntityId,
        sender: PeerId,
        holder: Option<PeerId>,
    },

    /// Input for a tick before the sender's predicting role began
    #[error("Input for {entity} from {sender} at tick {tick} predates ownership since tick {since}")]
    InputBeforeOwnership {
        entity: EntityId,
        sender: PeerId,
        tick: Tick,
        since: Tick,
    },

    /// Remote call not permitted for this caller
    #[error("Remote call {target:?} on {entity} denied for {caller}")]
    RpcDenied {
        entity: EntityId,
        caller: PeerId,
        target: RpcTarget,
    },

    /// The server can never own an entity
    #[error("The server cannot be assigned ownership of {0}")]
    ServerOwnership(EntityId),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Core error (configuration)
    #[error("Core error: {0}")]
    Core(#[from] tickwise_core::Error),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for netcode operations
pub type Result<T> = std::result::Result<T, Error>;
