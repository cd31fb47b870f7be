//! Authoritative simulation on the server
//!
//! The server steps every entity exactly once per tick with the owner's
//! input for that tick, or with the default input when none arrived in
//! time. After simulation it captures the state, keeps it in a short
//! history and hands it to the change-detection transmitter, which decides
//! whether a snapshot goes out.

use crate::{DirtyTracker, Error, Result, SendReason, SnapshotMessage};
use tickwise_core::{Approx, Channel, EntityId, EntityKind, NetConfig, PeerId, StepFlags, Tick, TickHistory};
use tickwise_rollback_buffer::RollbackBuffer;
use tracing::{debug, trace};

/// Phase of the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerPhase {
    /// Waiting for the tick
    #[default]
    Idle,
    /// Stepped with an input
    Simulated,
    /// Post-tick state captured
    Snapshotted,
}

/// Counters of the authoritative simulation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Ticks simulated
    pub ticks: u64,
    /// Ticks simulated with the default input
    pub defaulted_inputs: u64,
    /// Inputs accepted from the owner
    pub accepted_inputs: u64,
    /// Inputs that arrived for ticks already simulated
    pub late_inputs: u64,
    /// Inputs too far in the future to buffer
    pub early_inputs: u64,
    /// Snapshots handed to the transport
    pub snapshots_sent: u64,
}

/// A snapshot ready to send, with its delivery class
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingSnapshot<S> {
    pub message: SnapshotMessage<S>,
    pub channel: Channel,
    pub reason: SendReason,
}

/// Server-side simulation of one entity
pub struct AuthoritativeSim<B, I, S> {
    kind: EntityKind<B, I, S>,
    dt: f32,
    /// Owner inputs by tick
    inputs: RollbackBuffer<I>,
    /// Post-tick states by tick
    states: RollbackBuffer<S>,
    transmitter: DirtyTracker<S>,
    phase: ServerPhase,
    /// Newest simulated tick
    last_tick: Option<Tick>,
    /// Start of the current run of ticks simulated with genuine input
    exact_since: Option<Tick>,
    /// How far ahead of the simulation inputs may be buffered
    horizon: u64,
    stats: ServerStats,
}

impl<B, I: Clone + Default, S: Clone + Approx> AuthoritativeSim<B, I, S> {
    /// Create the simulation of an entity of `kind`
    pub fn new(kind: EntityKind<B, I, S>, config: &NetConfig) -> Self {
        let dt = config
            .tick_rate()
            .map(|rate| rate.delta_seconds())
            .unwrap_or(1.0 / 30.0);
        Self {
            kind,
            dt,
            inputs: RollbackBuffer::new(config.retention_horizon),
            states: RollbackBuffer::new(config.retention_horizon),
            transmitter: DirtyTracker::new(config.snapshot.clone()),
            phase: ServerPhase::Idle,
            last_tick: None,
            exact_since: None,
            horizon: config.retention_horizon as u64,
            stats: ServerStats::default(),
        }
    }

    /// Buffer owner inputs; returns how many were new
    ///
    /// The caller has already checked that the sender owns the entity.
    /// Inputs for ticks already simulated or beyond the horizon are dropped.
    pub fn receive_inputs(&mut self, inputs: impl IntoIterator<Item = (Tick, I)>) -> usize {
        let mut accepted = 0;
        for (tick, input) in inputs {
            if self.last_tick.is_some_and(|last| tick <= last) {
                // Redundant copies of inputs we already used land here
                self.stats.late_inputs += 1;
                continue;
            }
            let newest_allowed = self.last_tick.unwrap_or(tick).saturating_add(self.horizon);
            if tick > newest_allowed {
                self.stats.early_inputs += 1;
                debug!(tick, newest_allowed, "input too far ahead, dropped");
                continue;
            }
            if self.inputs.get(tick).is_none() {
                self.inputs.save(tick, input);
                accepted += 1;
            }
        }
        self.stats.accepted_inputs += accepted as u64;
        accepted
    }

    /// Authorize then buffer an input message
    pub fn receive_from(
        &mut self,
        entity: EntityId,
        ownership: &crate::Ownership,
        sender: PeerId,
        inputs: Vec<(Tick, I)>,
    ) -> Result<usize> {
        // Every tick in the window must be covered by the sender's ownership
        let mut authorized = Vec::with_capacity(inputs.len());
        let mut first_error: Option<Error> = None;
        for (tick, input) in inputs {
            match ownership.check_input(entity, sender, tick) {
                Ok(()) => authorized.push((tick, input)),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        let accepted = self.receive_inputs(authorized);
        match first_error {
            Some(err) if accepted == 0 => Err(err),
            _ => Ok(accepted),
        }
    }

    /// Step the body for `tick` with the buffered input or the default
    pub fn simulate(&mut self, body: &mut B, tick: Tick) {
        let input = match self.inputs.get(tick) {
            Some(input) => {
                self.exact_since.get_or_insert(tick);
                input.clone()
            }
            None => {
                self.stats.defaulted_inputs += 1;
                self.exact_since = None;
                trace!(tick, kind = self.kind.name, "no input for tick, using default");
                I::default()
            }
        };

        self.kind.simulate(body, &input, StepFlags::SERVER, self.dt);
        self.last_tick = Some(tick);
        self.phase = ServerPhase::Simulated;
        self.stats.ticks += 1;
    }

    /// Capture the post-tick state and decide whether to send a snapshot
    pub fn post_tick(&mut self, body: &B, tick: Tick) -> Option<OutgoingSnapshot<S>> {
        let state = self.kind.capture(body);
        self.states.save(tick, state.clone());
        self.phase = ServerPhase::Snapshotted;
        self.inputs.clear_before(tick + 1);

        let transmit = self.transmitter.update(tick, &state)?;
        self.stats.snapshots_sent += 1;
        Some(OutgoingSnapshot {
            message: SnapshotMessage {
                tick,
                exact_since: self.exact_since,
                state: transmit.value,
            },
            channel: transmit.channel,
            reason: transmit.reason,
        })
    }

    /// Begin a new tick
    pub fn begin_tick(&mut self) {
        self.phase = ServerPhase::Idle;
    }

    /// Drop buffered inputs and resend full state (ownership moved)
    pub fn reset_inputs(&mut self) {
        self.inputs.clear();
        self.exact_since = None;
        self.transmitter.invalidate();
    }

    /// Force the next post-tick to send a snapshot (new observer)
    pub fn invalidate(&mut self) {
        self.transmitter.invalidate();
    }

    /// Post-tick state of a recent tick
    pub fn state_at(&self, tick: Tick) -> Option<&S> {
        self.states.get(tick)
    }

    /// Phase of the current tick
    pub fn phase(&self) -> ServerPhase {
        self.phase
    }

    /// Newest simulated tick
    pub fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    /// Counters
    pub fn stats(&self) -> ServerStats {
        self.stats
    }
}

impl<B, I, S> std::fmt::Debug for AuthoritativeSim<B, I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritativeSim")
            .field("kind", &self.kind.name)
            .field("phase", &self.phase)
            .field("last_tick", &self.last_tick)
            .field("stats", &self.stats)
            .finish()
    }
}
