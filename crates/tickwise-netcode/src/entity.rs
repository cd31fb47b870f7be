//! Networked entity: one body, three possible roles
//!
//! A [`NetEntity`] owns the body of one entity and switches behaviour by the
//! local peer's [`AuthorityRole`]:
//!
//! - **Authoritative** (server): step with the owner's input, snapshot,
//!   replicate fields.
//! - **Predicting** (owner): reconcile to the newest snapshot, then capture
//!   and simulate local input and send it.
//! - **Observing** (everyone else): adopt snapshots as they arrive.
//!
//! Inbound packets are queued and consumed at the start of the next tick, so
//! message arrival never interleaves with simulation.

use crate::transport::{InputMessage, Outgoing, Packet, PacketKind, Route, SnapshotMessage};
use crate::{
    AuthoritativeSim, BufferStats, CorrectionSmoother, InputCapture, InputSource, Interpolator,
    Lerp, Ownership, PredictionStats, Predictor, ReplicatedField, Result, ServerStats, SyncVar,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use tickwise_core::{
    Approx, AuthorityRole, Channel, EntityId, EntityKind, NetConfig, PeerId, Tick, TickListener,
};
use tracing::{debug, warn};

/// Type-erased entity as stored by the session
pub trait Replicated: TickListener + Send {
    /// Entity identifier
    fn id(&self) -> EntityId;

    /// Registered kind name
    fn kind_name(&self) -> &'static str;

    /// Local role
    fn role(&self) -> AuthorityRole;

    /// Current ownership record
    fn ownership(&self) -> Ownership;

    /// Install a new ownership record (spawn or transfer)
    fn set_ownership(&mut self, ownership: Ownership);

    /// Queue a packet for the next tick
    fn deliver(&mut self, from: PeerId, packet: Packet);

    /// Drain packets produced during the last tick
    fn take_outgoing(&mut self) -> Vec<Outgoing>;

    /// Resend snapshot and fields in full on the next post-tick
    fn invalidate(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Bounds required of an input record
pub trait InputRecord: Clone + Default + Serialize + DeserializeOwned + Send + 'static {}

impl<T> InputRecord for T where T: Clone + Default + Serialize + DeserializeOwned + Send + 'static {}

/// Bounds required of a snapshot
pub trait SnapshotRecord: Clone + Approx + Lerp + Serialize + DeserializeOwned + Send + 'static {}

impl<T> SnapshotRecord for T where T: Clone + Approx + Lerp + Serialize + DeserializeOwned + Send + 'static {}

/// A networked entity on one peer
pub struct NetEntity<B, I, S> {
    id: EntityId,
    kind: EntityKind<B, I, S>,
    body: B,
    /// The peer this instance runs on
    local: PeerId,
    ownership: Ownership,
    role: AuthorityRole,
    capture: InputCapture<I>,
    predictor: Predictor<B, I, S>,
    server: AuthoritativeSim<B, I, S>,
    /// Replicated fields, addressed by index
    fields: Vec<Box<dyn ReplicatedField>>,
    smoother: CorrectionSmoother<S>,
    interpolator: Interpolator<S>,
    inbox: VecDeque<(PeerId, Packet)>,
    outbox: Vec<Outgoing>,
    /// Inputs rejected by the authority check
    rejected_inputs: u64,
}

impl<B, I, S> NetEntity<B, I, S>
where
    B: Send + 'static,
    I: InputRecord,
    S: SnapshotRecord,
{
    /// Create an entity running on `local`, owned per `ownership`
    pub fn new(
        id: EntityId,
        kind: EntityKind<B, I, S>,
        body: B,
        local: PeerId,
        ownership: Ownership,
        config: &NetConfig,
    ) -> Self {
        Self {
            id,
            kind,
            body,
            local,
            ownership,
            role: ownership.role_of(local),
            capture: InputCapture::default(),
            predictor: Predictor::new(kind, config),
            server: AuthoritativeSim::new(kind, config),
            fields: Vec::new(),
            // A fifth of a second at the configured rate
            smoother: CorrectionSmoother::new((config.tick_rate_hz / 5).max(1)),
            interpolator: Interpolator::new(),
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            rejected_inputs: 0,
        }
    }

    /// Sample local input from `source` while predicting
    pub fn with_input(mut self, source: impl InputSource<I> + Send + 'static) -> Self {
        self.capture.set_source(source);
        self
    }

    /// Attach a replicated field; returns its index
    pub fn add_field<T: 'static>(&mut self, field: SyncVar<T>) -> u16
    where
        SyncVar<T>: ReplicatedField,
    {
        self.fields.push(Box::new(field));
        (self.fields.len() - 1) as u16
    }

    /// Typed access to a replicated field
    pub fn field<T: 'static>(&self, index: u16) -> Option<&SyncVar<T>> {
        self.fields
            .get(index as usize)
            .and_then(|f| f.as_any().downcast_ref())
    }

    /// Typed mutable access to a replicated field
    pub fn field_mut<T: 'static>(&mut self, index: u16) -> Option<&mut SyncVar<T>> {
        self.fields
            .get_mut(index as usize)
            .and_then(|f| f.as_any_mut().downcast_mut())
    }

    /// The simulated body
    pub fn body(&self) -> &B {
        &self.body
    }

    /// Mutable body, for spawning or server-side edits outside the tick
    pub fn body_mut(&mut self) -> &mut B {
        &mut self.body
    }

    /// Current state as a snapshot
    pub fn state(&self) -> S {
        self.kind.capture(&self.body)
    }

    /// State to render: smoothed while predicting, interpolated while observing
    ///
    /// `alpha` is the clock's progress towards the next tick.
    pub fn render_state(&self, alpha: f32) -> S {
        let current = self.state();
        match self.role {
            AuthorityRole::Predicting => self.smoother.view(&current),
            AuthorityRole::Observing => self.interpolator.interpolate(alpha).unwrap_or(current),
            AuthorityRole::Authoritative => current,
        }
    }

    /// Prediction counters
    pub fn prediction_stats(&self) -> PredictionStats {
        self.predictor.stats()
    }

    /// Occupancy of the predicted input history
    pub fn input_history(&self) -> BufferStats {
        self.predictor.history_stats()
    }

    /// Server counters
    pub fn server_stats(&self) -> ServerStats {
        self.server.stats()
    }

    /// Inputs rejected because the sender did not own the entity
    pub fn rejected_inputs(&self) -> u64 {
        self.rejected_inputs
    }

    /// The prediction engine
    pub fn predictor(&self) -> &Predictor<B, I, S> {
        &self.predictor
    }

    fn drain_inbox(&mut self) {
        while let Some((from, packet)) = self.inbox.pop_front() {
            if let Err(err) = self.handle(from, &packet) {
                warn!(entity = %self.id, %from, kind = ?packet.kind, "dropped packet: {}", err);
            }
        }
    }

    fn handle(&mut self, from: PeerId, packet: &Packet) -> Result<()> {
        match (packet.kind, self.role) {
            (PacketKind::Input, AuthorityRole::Authoritative) => {
                let message: InputMessage<I> = packet.message()?;
                let result = self.server.receive_from(self.id, &self.ownership, from, message.inputs);
                if result.is_err() {
                    self.rejected_inputs += 1;
                }
                result.map(|_| ())
            }
            (PacketKind::Snapshot, role) if role != AuthorityRole::Authoritative => {
                if !from.is_server() {
                    debug!(entity = %self.id, %from, "snapshot from non-server peer ignored");
                    return Ok(());
                }
                let snapshot: SnapshotMessage<S> = packet.message()?;
                self.predictor.receive_snapshot(snapshot);
                Ok(())
            }
            (PacketKind::Field(index), role) if role != AuthorityRole::Authoritative => {
                if !from.is_server() {
                    return Ok(());
                }
                match self.fields.get_mut(index as usize) {
                    Some(field) => field.apply_encoded(&packet.payload).map(|_| ()),
                    None => {
                        debug!(entity = %self.id, index, "update for unknown field");
                        Ok(())
                    }
                }
            }
            (kind, role) => {
                debug!(entity = %self.id, ?kind, %role, "packet not meant for this role");
                Ok(())
            }
        }
    }

    fn tick_predicting(&mut self, tick: Tick) {
        if let Some(correction) = self.predictor.reconcile(&mut self.body) {
            if correction.before.differs(&correction.after, 0.0) {
                self.smoother.begin(self.smoother.view(&correction.before));
            }
        }

        let input = self.capture.capture(tick, self.predictor.inputs_mut());
        let window = self.predictor.predict(&mut self.body, tick, input);
        self.smoother.advance();

        match Packet::new(self.id, PacketKind::Input, &InputMessage { inputs: window }) {
            Ok(packet) => self.outbox.push(Outgoing {
                route: Route::Server,
                channel: Channel::Unreliable,
                packet,
            }),
            Err(err) => warn!(entity = %self.id, "failed to encode input: {}", err),
        }
    }

    fn tick_observing(&mut self) {
        // Observers have no inputs, so reconciling is a plain adopt
        if let Some(correction) = self.predictor.reconcile(&mut self.body) {
            self.interpolator.push_state(correction.tick, correction.after);
        }
    }

    fn post_tick_authoritative(&mut self, tick: Tick) {
        if let Some(snapshot) = self.server.post_tick(&self.body, tick) {
            match Packet::new(self.id, PacketKind::Snapshot, &snapshot.message) {
                Ok(packet) => self.outbox.push(Outgoing {
                    route: Route::Observers,
                    channel: snapshot.channel,
                    packet,
                }),
                Err(err) => warn!(entity = %self.id, "failed to encode snapshot: {}", err),
            }
        }

        for (index, field) in self.fields.iter_mut().enumerate() {
            let route = match field.permission() {
                crate::ReadPermission::Observers => Route::Observers,
                crate::ReadPermission::OwnerOnly => Route::Owner,
            };
            match field.poll_encoded(tick) {
                Ok(Some((channel, payload))) => self.outbox.push(Outgoing {
                    route,
                    channel,
                    packet: Packet {
                        entity: self.id,
                        kind: PacketKind::Field(index as u16),
                        payload,
                    },
                }),
                Ok(None) => {}
                Err(err) => warn!(entity = %self.id, index, "failed to encode field: {}", err),
            }
        }
    }
}

impl<B, I, S> TickListener for NetEntity<B, I, S>
where
    B: Send + 'static,
    I: InputRecord,
    S: SnapshotRecord,
{
    fn on_tick(&mut self, tick: Tick) {
        self.drain_inbox();
        match self.role {
            AuthorityRole::Authoritative => {
                self.server.begin_tick();
                self.server.simulate(&mut self.body, tick);
            }
            AuthorityRole::Predicting => self.tick_predicting(tick),
            AuthorityRole::Observing => self.tick_observing(),
        }
    }

    fn on_post_tick(&mut self, tick: Tick) {
        if self.role == AuthorityRole::Authoritative {
            self.post_tick_authoritative(tick);
        }
    }
}

impl<B, I, S> Replicated for NetEntity<B, I, S>
where
    B: Send + 'static,
    I: InputRecord,
    S: SnapshotRecord,
{
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind_name(&self) -> &'static str {
        self.kind.name
    }

    fn role(&self) -> AuthorityRole {
        self.role
    }

    fn ownership(&self) -> Ownership {
        self.ownership
    }

    fn set_ownership(&mut self, ownership: Ownership) {
        let role = ownership.role_of(self.local);
        if ownership.owner != self.ownership.owner {
            // Input and predictions from the previous owner no longer apply
            self.predictor.reset();
            self.server.reset_inputs();
            self.interpolator.reset();
        }
        if role != self.role {
            debug!(entity = %self.id, from = %self.role, to = %role, "role changed");
        }
        self.ownership = ownership;
        self.role = role;
    }

    fn deliver(&mut self, from: PeerId, packet: Packet) {
        self.inbox.push_back((from, packet));
    }

    fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    fn invalidate(&mut self) {
        self.server.invalidate();
        for field in &mut self.fields {
            field.invalidate();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<B, I, S> std::fmt::Debug for NetEntity<B, I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetEntity")
            .field("id", &self.id)
            .field("kind", &self.kind.name)
            .field("role", &self.role)
            .field("ownership", &self.ownership)
            .field("fields", &self.fields.len())
            .finish()
    }
}
