//! Authority resolution: who simulates, predicts or merely observes
//!
//! The server is authoritative for every entity. At most one client, the
//! owner, holds the predicting role for an entity at a time; everyone else
//! observes. Ownership changes only on the server and are announced to
//! clients as [`OwnershipChange`] messages over the reliable channel.

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tickwise_core::{AuthorityRole, EntityId, PeerId, Tick};
use tracing::{debug, info};

/// Current ownership record of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ownership {
    /// Owning client, `None` when only the server drives the entity
    pub owner: Option<PeerId>,
    /// First tick for which the owner's input is honored
    pub since: Tick,
    /// Incremented on every change; orders concurrent notifications
    pub epoch: u64,
}

impl Ownership {
    /// Ownership by `owner` starting at `since`
    pub fn new(owner: Option<PeerId>, since: Tick) -> Self {
        Self {
            owner,
            since,
            epoch: 0,
        }
    }

    /// Role of `peer` under this ownership
    pub fn role_of(&self, peer: PeerId) -> AuthorityRole {
        if peer.is_server() {
            AuthorityRole::Authoritative
        } else if self.owner == Some(peer) {
            AuthorityRole::Predicting
        } else {
            AuthorityRole::Observing
        }
    }

    /// Check that `sender` may supply input for `tick`
    pub fn check_input(&self, entity: EntityId, sender: PeerId, tick: Tick) -> Result<()> {
        if self.owner != Some(sender) {
            return Err(Error::AuthorityViolation {
                entity,
                sender,
                holder: self.owner,
            });
        }
        if tick < self.since {
            return Err(Error::InputBeforeOwnership {
                entity,
                sender,
                tick,
                since: self.since,
            });
        }
        Ok(())
    }
}

/// Notification of an ownership transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipChange {
    pub entity: EntityId,
    pub previous: Option<PeerId>,
    pub current: Option<PeerId>,
    /// First tick of the new owner's predicting role
    pub tick: Tick,
    pub epoch: u64,
}

impl OwnershipChange {
    /// The ownership record this change establishes
    pub fn ownership(&self) -> Ownership {
        Ownership {
            owner: self.current,
            since: self.tick,
            epoch: self.epoch,
        }
    }
}

/// Who a remote call is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcTarget {
    /// Client → server, optionally only from the owner
    Server { require_ownership: bool },
    /// Server → every observer
    Observers,
    /// Server → one client
    Target(PeerId),
}

/// Ownership table of every registered entity
#[derive(Debug, Clone)]
pub struct AuthorityResolver {
    /// The peer this resolver runs on
    local: PeerId,
    entities: IndexMap<EntityId, Ownership>,
}

impl AuthorityResolver {
    /// Create an empty table for `local`
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            entities: IndexMap::new(),
        }
    }

    /// The peer this resolver runs on
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Register an entity with its initial ownership
    pub fn register(&mut self, entity: EntityId, ownership: Ownership) -> Result<()> {
        if ownership.owner.is_some_and(|p| p.is_server()) {
            return Err(Error::ServerOwnership(entity));
        }
        if self.entities.contains_key(&entity) {
            return Err(Error::DuplicateEntity(entity));
        }
        self.entities.insert(entity, ownership);
        Ok(())
    }

    /// Register an entity that may already be known from an ownership change
    ///
    /// A client can hear about an entity before spawning it. The record with
    /// the newer epoch wins; on a tie the one already held is kept.
    pub fn merge(&mut self, entity: EntityId, ownership: Ownership) -> Result<Ownership> {
        if ownership.owner.is_some_and(|p| p.is_server()) {
            return Err(Error::ServerOwnership(entity));
        }
        let record = self.entities.entry(entity).or_insert(ownership);
        if ownership.epoch > record.epoch {
            *record = ownership;
        }
        Ok(*record)
    }

    /// Remove an entity; returns false if it was already gone
    pub fn unregister(&mut self, entity: EntityId) -> bool {
        self.entities.shift_remove(&entity).is_some()
    }

    /// Check if an entity is registered
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    /// Ownership record of an entity
    pub fn ownership(&self, entity: EntityId) -> Option<&Ownership> {
        self.entities.get(&entity)
    }

    /// Current owner of an entity
    pub fn owner(&self, entity: EntityId) -> Option<PeerId> {
        self.entities.get(&entity).and_then(|o| o.owner)
    }

    /// Role of `peer` for `entity`
    ///
    /// Unknown entities resolve to [`AuthorityRole::Observing`] for clients.
    pub fn role(&self, entity: EntityId, peer: PeerId) -> AuthorityRole {
        self.entities
            .get(&entity)
            .copied()
            .unwrap_or_default()
            .role_of(peer)
    }

    /// Role of the local peer for `entity`
    pub fn local_role(&self, entity: EntityId) -> AuthorityRole {
        self.role(entity, self.local)
    }

    /// Move the predicting role of `entity` to `new_owner`, effective at `tick`
    ///
    /// Only the server may call this. The returned change must be sent to
    /// every client over the reliable channel.
    pub fn transfer_ownership(
        &mut self,
        caller: PeerId,
        entity: EntityId,
        new_owner: Option<PeerId>,
        tick: Tick,
    ) -> Result<OwnershipChange> {
        if !caller.is_server() || !self.local.is_server() {
            return Err(Error::NotAuthoritative { caller });
        }
        if new_owner.is_some_and(|p| p.is_server()) {
            return Err(Error::ServerOwnership(entity));
        }
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(Error::UnknownEntity(entity))?;

        let change = OwnershipChange {
            entity,
            previous: record.owner,
            current: new_owner,
            tick,
            epoch: record.epoch + 1,
        };
        *record = change.ownership();

        info!(
            %entity,
            previous = ?change.previous,
            current = ?change.current,
            tick,
            "ownership transferred"
        );
        Ok(change)
    }

    /// Apply an ownership notification received from the server
    ///
    /// Returns false for notifications older than the current record.
    pub fn apply_change(&mut self, change: &OwnershipChange) -> bool {
        match self.entities.get_mut(&change.entity) {
            Some(record) if change.epoch <= record.epoch => {
                debug!(entity = %change.entity, epoch = change.epoch, "stale ownership change ignored");
                false
            }
            Some(record) => {
                *record = change.ownership();
                true
            }
            None => {
                self.entities.insert(change.entity, change.ownership());
                true
            }
        }
    }

    /// Check that `sender` may supply input for `entity` at `tick`
    pub fn check_input(&self, entity: EntityId, sender: PeerId, tick: Tick) -> Result<()> {
        self.entities
            .get(&entity)
            .ok_or(Error::UnknownEntity(entity))?
            .check_input(entity, sender, tick)
    }

    /// Check that `caller` may invoke a remote call on `entity`
    pub fn authorize_rpc(&self, entity: EntityId, caller: PeerId, target: RpcTarget) -> Result<()> {
        let ownership = self
            .entities
            .get(&entity)
            .ok_or(Error::UnknownEntity(entity))?;

        let allowed = match target {
            RpcTarget::Server { require_ownership } => {
                !require_ownership || ownership.owner == Some(caller)
            }
            RpcTarget::Observers | RpcTarget::Target(_) => caller.is_server(),
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::RpcDenied {
                entity,
                caller,
                target,
            })
        }
    }

    /// Iterate ownership records in registration order
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Ownership)> {
        self.entities.iter().map(|(id, o)| (*id, o))
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if no entity is registered
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
