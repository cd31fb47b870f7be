//! Session: one peer's view of the networked world
//!
//! The [`Session`] owns the tick clock, the entity arena, the authority
//! table, a timer queue and the transport. Every step or frame first
//! receives everything the transport has and routes it to entity inboxes.
//! Ownership notifications are applied immediately, and a client that finds
//! itself behind the server's snapshots skips its clock ahead. Then each due
//! tick runs in a fixed order:
//!
//! 1. Fire due timers.
//! 2. `Tick` for every entity, then `PostTick` for every entity.
//! 3. Flush produced packets to the transport.

use crate::entity::Replicated;
use crate::transport::{snapshot_tick, Outgoing, Packet, PacketKind, Route, Transport};
use crate::{AuthorityResolver, Error, NetEntity, Ownership, OwnershipChange, Result, RpcTarget};
use indexmap::IndexMap;
use std::time::Duration;
use tickwise_core::{
    AuthorityRole, Channel, EntityId, ListenerId, NetConfig, PeerId, Tick, TickBatch, TickClock,
    TickSchedule, TimerId, TimerQueue,
};
use tracing::{debug, info, trace, warn};

/// Registered entities in tick order
#[derive(Default)]
pub struct EntityRegistry {
    schedule: TickSchedule<dyn Replicated>,
    index: IndexMap<EntityId, ListenerId>,
}

impl EntityRegistry {
    /// Look up an entity as its concrete type
    pub fn get<B: 'static, I: 'static, S: 'static>(&self, id: EntityId) -> Option<&NetEntity<B, I, S>> {
        self.get_dyn(id)?.as_any().downcast_ref()
    }

    /// Look up an entity mutably as its concrete type
    pub fn get_mut<B: 'static, I: 'static, S: 'static>(
        &mut self,
        id: EntityId,
    ) -> Option<&mut NetEntity<B, I, S>> {
        self.get_dyn_mut(id)?.as_any_mut().downcast_mut()
    }

    /// Look up an entity behind the type-erased interface
    pub fn get_dyn(&self, id: EntityId) -> Option<&(dyn Replicated + 'static)> {
        let handle = *self.index.get(&id)?;
        self.schedule.get(handle)
    }

    /// Mutable type-erased lookup
    pub fn get_dyn_mut(&mut self, id: EntityId) -> Option<&mut (dyn Replicated + 'static)> {
        let handle = *self.index.get(&id)?;
        self.schedule.get_mut(handle)
    }

    /// Check if an entity is registered
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if no entity is registered
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn insert(&mut self, entity: Box<dyn Replicated>) {
        let id = entity.id();
        let handle = self.schedule.register(entity);
        self.index.insert(id, handle);
    }

    fn remove(&mut self, id: EntityId) -> bool {
        match self.index.shift_remove(&id) {
            Some(handle) => self.schedule.unregister(handle).is_some(),
            None => false,
        }
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A side task run by the timer queue
pub type Task = Box<dyn FnMut(Tick, &mut EntityRegistry) + Send>;

/// Counters of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Packets that could not be decoded or routed
    pub packets_dropped: u64,
    pub send_errors: u64,
    /// Times the clock skipped ahead to follow the server
    pub resyncs: u64,
}

/// One peer's netcode session
pub struct Session<T: Transport> {
    config: NetConfig,
    clock: TickClock,
    local: PeerId,
    resolver: AuthorityResolver,
    entities: EntityRegistry,
    /// Connected clients (server side)
    peers: Vec<PeerId>,
    transport: T,
    timers: TimerQueue<u64>,
    tasks: IndexMap<u64, Task>,
    next_task: u64,
    stats: SessionStats,
}

impl<T: Transport> Session<T> {
    /// Create a session speaking through `transport`
    pub fn new(config: NetConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let rate = config.tick_rate()?;
        let local = transport.local_peer();
        info!(peer = %local, rate = %rate, horizon = config.retention_horizon, "session started");
        Ok(Self {
            clock: TickClock::new(rate, config.max_ticks_per_frame),
            config,
            local,
            resolver: AuthorityResolver::new(local),
            entities: EntityRegistry::default(),
            peers: Vec::new(),
            transport,
            timers: TimerQueue::new(),
            tasks: IndexMap::new(),
            next_task: 0,
            stats: SessionStats::default(),
        })
    }

    /// Start the clock at `tick` instead of 1
    ///
    /// For a peer joining a running session whose current tick is known.
    pub fn with_start_tick(mut self, tick: Tick) -> Self {
        self.clock = TickClock::starting_at(self.clock.rate(), self.config.max_ticks_per_frame, tick);
        self
    }

    /// The configuration in use
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// The peer this session runs on
    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    /// The authority table
    pub fn resolver(&self) -> &AuthorityResolver {
        &self.resolver
    }

    /// The entity arena
    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// The entity arena, mutably
    pub fn entities_mut(&mut self) -> &mut EntityRegistry {
        &mut self.entities
    }

    /// The tick clock
    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Counters
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Register a client with the server
    ///
    /// Every entity resends its full state so the new observer catches up.
    pub fn connect_peer(&mut self, peer: PeerId) {
        if peer == self.local || self.peers.contains(&peer) {
            return;
        }
        self.peers.push(peer);
        for (_, entity) in self.entities.schedule.iter_mut() {
            entity.invalidate();
        }
        if self.local.is_server() {
            // Late joiners need the current ownership of everything
            let changes: Vec<_> = self
                .resolver
                .iter()
                .map(|(entity, o)| OwnershipChange {
                    entity,
                    previous: None,
                    current: o.owner,
                    tick: o.since,
                    epoch: o.epoch,
                })
                .collect();
            for change in changes {
                self.send_ownership(&change, Route::Peer(peer));
            }
        }
        info!(%peer, "peer connected");
    }

    /// Forget a client
    pub fn disconnect_peer(&mut self, peer: PeerId) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| *p != peer);
        before != self.peers.len()
    }

    /// Connected clients
    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// Add an entity
    ///
    /// Every peer spawns the same entity ID with the same initial ownership;
    /// spawn messages themselves are outside this crate. A late joiner may
    /// already hold a newer ownership record from the server, which wins.
    pub fn spawn<B, I, S>(&mut self, mut entity: NetEntity<B, I, S>) -> Result<EntityId>
    where
        NetEntity<B, I, S>: Replicated + 'static,
    {
        let id = entity.id();
        if self.entities.contains(id) {
            return Err(Error::DuplicateEntity(id));
        }
        let ownership = self.resolver.merge(id, entity.ownership())?;
        entity.set_ownership(ownership);
        debug!(entity = %id, kind = entity.kind_name(), role = %entity.role(), "spawned");
        self.entities.insert(Box::new(entity));
        Ok(id)
    }

    /// Remove an entity; returns false if it was already gone
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let removed = self.entities.remove(id);
        self.resolver.unregister(id);
        removed
    }

    /// Transfer the predicting role of `entity` (server only)
    ///
    /// The new owner's input is honored from the next tick on.
    pub fn transfer_ownership(&mut self, entity: EntityId, new_owner: Option<PeerId>) -> Result<OwnershipChange> {
        let since = self.clock.next_tick();
        let change = self
            .resolver
            .transfer_ownership(self.local, entity, new_owner, since)?;
        if let Some(target) = self.entities.get_dyn_mut(entity) {
            target.set_ownership(change.ownership());
        }
        self.send_ownership(&change, Route::Observers);
        Ok(change)
    }

    /// Check whether the local peer may invoke a remote call on `entity`
    pub fn authorize_rpc(&self, entity: EntityId, target: RpcTarget) -> Result<()> {
        self.resolver.authorize_rpc(entity, self.local, target)
    }

    /// Local role for an entity
    pub fn role(&self, entity: EntityId) -> AuthorityRole {
        self.resolver.local_role(entity)
    }

    /// Run `task` once, `delay_ticks` from now
    pub fn schedule_once(
        &mut self,
        delay_ticks: u64,
        task: impl FnMut(Tick, &mut EntityRegistry) + Send + 'static,
    ) -> TimerId {
        let key = self.add_task(task);
        let now = self.clock.current_tick().unwrap_or(0);
        self.timers.schedule_once(key, delay_ticks, now)
    }

    /// Run `task` every `interval_ticks`
    pub fn schedule_every(
        &mut self,
        interval_ticks: u64,
        task: impl FnMut(Tick, &mut EntityRegistry) + Send + 'static,
    ) -> TimerId {
        let key = self.add_task(task);
        let now = self.clock.current_tick().unwrap_or(0);
        self.timers.schedule_every(key, interval_ticks, now)
    }

    /// Cancel a scheduled task
    pub fn cancel(&mut self, timer: TimerId) -> bool {
        self.timers.cancel(timer)
    }

    /// Advance wall time and run every tick that came due
    pub fn advance(&mut self, elapsed: Duration) -> TickBatch {
        self.receive();
        let batch = self.clock.advance(elapsed);
        for tick in batch.ticks() {
            self.run_tick(tick);
        }
        batch
    }

    /// Run exactly one tick, regardless of wall time
    pub fn step(&mut self) -> Tick {
        self.receive();
        let tick = self.clock.step();
        self.run_tick(tick);
        tick
    }

    fn run_tick(&mut self, tick: Tick) {
        self.fire_timers(tick);
        self.entities.schedule.run_tick(tick);
        self.flush();
        self.stats.ticks += 1;
    }

    fn receive(&mut self) {
        loop {
            let (data, from) = match self.transport.recv() {
                Ok(Some(datagram)) => datagram,
                Ok(None) => break,
                Err(err) => {
                    warn!("transport receive failed: {}", err);
                    break;
                }
            };
            self.stats.packets_received += 1;

            let packet = match Packet::from_bytes(&data) {
                Ok(packet) => packet,
                Err(err) => {
                    self.stats.packets_dropped += 1;
                    debug!(%from, "undecodable packet: {}", err);
                    continue;
                }
            };

            if packet.kind == PacketKind::Ownership {
                self.receive_ownership(from, &packet);
                continue;
            }
            if packet.kind == PacketKind::Snapshot && from.is_server() && !self.local.is_server() {
                self.follow_server(&packet);
            }

            match self.entities.get_dyn_mut(packet.entity) {
                Some(entity) => entity.deliver(from, packet),
                None => {
                    self.stats.packets_dropped += 1;
                    trace!(entity = %packet.entity, %from, "packet for unknown entity");
                }
            }
        }
    }

    /// Keep the clock `input_lead` ticks past the newest server snapshot
    fn follow_server(&mut self, packet: &Packet) {
        let Ok(server_tick) = snapshot_tick(&packet.payload) else {
            return;
        };
        let target = server_tick + 1 + self.config.input_lead;
        if self.clock.skip_to(target) {
            self.stats.resyncs += 1;
            info!(server_tick, next = target, "behind the server, skipping ahead");
        }
    }

    fn receive_ownership(&mut self, from: PeerId, packet: &Packet) {
        if !from.is_server() {
            self.stats.packets_dropped += 1;
            warn!(%from, "ownership change from non-server peer ignored");
            return;
        }
        let change: OwnershipChange = match packet.message() {
            Ok(change) => change,
            Err(err) => {
                self.stats.packets_dropped += 1;
                debug!("undecodable ownership change: {}", err);
                return;
            }
        };
        if self.resolver.apply_change(&change) {
            if let Some(entity) = self.entities.get_dyn_mut(change.entity) {
                entity.set_ownership(change.ownership());
            }
            info!(
                entity = %change.entity,
                owner = ?change.current,
                since = change.tick,
                role = %self.resolver.local_role(change.entity),
                "ownership updated"
            );
        }
    }

    fn fire_timers(&mut self, tick: Tick) {
        for key in self.timers.fire(tick) {
            if let Some(task) = self.tasks.get_mut(&key) {
                task(tick, &mut self.entities);
            }
        }
        // One-shot tasks whose timer is gone can be dropped
        if self.timers.len() < self.tasks.len() {
            let live: Vec<u64> = self.timers_keys();
            self.tasks.retain(|key, _| live.contains(key));
        }
    }

    fn timers_keys(&self) -> Vec<u64> {
        self.timers.payloads().copied().collect()
    }

    fn add_task(&mut self, task: impl FnMut(Tick, &mut EntityRegistry) + Send + 'static) -> u64 {
        let key = self.next_task;
        self.next_task += 1;
        self.tasks.insert(key, Box::new(task));
        key
    }

    fn send_ownership(&mut self, change: &OwnershipChange, route: Route) {
        match Packet::new(change.entity, PacketKind::Ownership, change) {
            Ok(packet) => {
                let outgoing = Outgoing {
                    route,
                    channel: Channel::Reliable,
                    packet,
                };
                self.send(&outgoing);
            }
            Err(err) => warn!(entity = %change.entity, "failed to encode ownership change: {}", err),
        }
    }

    fn flush(&mut self) {
        let mut outgoing = Vec::new();
        for (_, entity) in self.entities.schedule.iter_mut() {
            outgoing.extend(entity.take_outgoing());
        }
        for message in &outgoing {
            self.send(message);
        }
    }

    fn send(&mut self, outgoing: &Outgoing) {
        let data = match outgoing.packet.to_bytes() {
            Ok(data) => data,
            Err(err) => {
                warn!(entity = %outgoing.packet.entity, "failed to encode packet: {}", err);
                return;
            }
        };
        for target in self.targets(outgoing) {
            match self.transport.send(&data, target, outgoing.channel) {
                Ok(()) => self.stats.packets_sent += 1,
                Err(err) => {
                    self.stats.send_errors += 1;
                    warn!(%target, "transport send failed: {}", err);
                }
            }
        }
    }

    fn targets(&self, outgoing: &Outgoing) -> Vec<PeerId> {
        match outgoing.route {
            Route::Server if !self.local.is_server() => vec![PeerId::SERVER],
            Route::Server => Vec::new(),
            Route::Observers => self.peers.clone(),
            Route::Owner => self
                .resolver
                .owner(outgoing.packet.entity)
                .filter(|owner| self.peers.contains(owner))
                .into_iter()
                .collect(),
            Route::Peer(peer) => vec![peer],
        }
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local", &self.local)
            .field("clock", &self.clock)
            .field("entities", &self.entities)
            .field("peers", &self.peers)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Ownership record for a freshly spawned entity
pub fn owned_by(owner: Option<PeerId>) -> Ownership {
    Ownership::new(owner, 0)
}
