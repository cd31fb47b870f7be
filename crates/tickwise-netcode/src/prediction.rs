//! Client-side prediction engine
//!
//! The predicting peer simulates its own input immediately instead of
//! waiting a round trip for the server. Every input is kept in a bounded
//! history; when an authoritative snapshot arrives the engine rewinds the
//! body to it and re-simulates the inputs the server had not yet processed.
//!
//! Per tick the order is fixed: apply the pending snapshot (with replay),
//! then capture and simulate the new input.

use crate::reconciliation::compare::{self, Divergence};
use crate::{CorrectionPlan, ReconcileState, Reconciler, SnapshotMessage, SnapshotVerdict};
use tickwise_core::{Approx, EntityKind, NetConfig, StepFlags, Tick, TickHistory};
use tickwise_rollback_buffer::{BufferStats, RollbackBuffer};
use tracing::{debug, error, trace, warn};

/// Counters of the prediction engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionStats {
    /// Snapshots corrected by replay
    pub replays: u64,
    /// Inputs re-simulated across all replays
    pub replayed_inputs: u64,
    /// Snapshots adopted without replay
    pub adopted: u64,
    /// Snapshots that exceeded the replay horizon
    pub hard_resets: u64,
    /// Snapshots discarded as not newer than what was applied
    pub stale_snapshots: u64,
    /// Predictions that differed from the server for ordinary reasons
    pub mispredictions: u64,
    /// Predictions that differed although inputs were identical
    pub nondeterminism: u64,
}

/// How a snapshot was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionKind {
    /// Adopted without replay
    Adopted,
    /// Replayed this many buffered inputs
    Replayed(u64),
    /// Horizon exceeded or history incomplete
    HardReset,
}

/// Result of applying a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Correction<S> {
    /// Tick of the applied snapshot
    pub tick: Tick,
    pub kind: CorrectionKind,
    /// Local state just before the snapshot was applied
    pub before: S,
    /// Local state after application and replay
    pub after: S,
}

/// Client-side prediction and reconciliation for one entity
pub struct Predictor<B, I, S> {
    kind: EntityKind<B, I, S>,
    /// Seconds per tick, passed to physics integration
    dt: f32,
    /// Inputs by tick
    inputs: RollbackBuffer<I>,
    /// Predicted post-tick states, for the determinism diagnostic
    predicted: RollbackBuffer<S>,
    reconciler: Reconciler<S>,
    /// Newest tick simulated locally
    last_tick: Option<Tick>,
    /// Snapshot tick the current predictions were replayed from
    replay_base: Option<Tick>,
    input_redundancy: usize,
    determinism_epsilon: f32,
    stats: PredictionStats,
}

impl<B, I: Clone, S: Clone + Approx> Predictor<B, I, S> {
    /// Create a predictor for an entity of `kind`
    pub fn new(kind: EntityKind<B, I, S>, config: &NetConfig) -> Self {
        let dt = config
            .tick_rate()
            .map(|rate| rate.delta_seconds())
            .unwrap_or(1.0 / 30.0);
        Self {
            kind,
            dt,
            inputs: RollbackBuffer::new(config.retention_horizon),
            predicted: RollbackBuffer::new(config.retention_horizon),
            reconciler: Reconciler::new(config.retention_horizon),
            last_tick: None,
            replay_base: None,
            input_redundancy: config.input_redundancy,
            determinism_epsilon: config.determinism_epsilon,
            stats: PredictionStats::default(),
        }
    }

    /// Queue a received snapshot for application on the next tick
    pub fn receive_snapshot(&mut self, snapshot: SnapshotMessage<S>) -> SnapshotVerdict {
        let verdict = self.reconciler.offer(snapshot);
        match verdict {
            SnapshotVerdict::Stale => self.stats.stale_snapshots += 1,
            SnapshotVerdict::Superseded { replaced } => {
                trace!(replaced, "pending snapshot superseded");
            }
            SnapshotVerdict::Accepted => {}
        }
        verdict
    }

    /// Apply the pending snapshot, if any, and replay buffered input
    pub fn reconcile(&mut self, body: &mut B) -> Option<Correction<S>> {
        let snapshot = self.reconciler.take_pending()?;
        let before = self.kind.capture(body);

        self.diagnose(&snapshot);

        let plan = self
            .reconciler
            .plan(snapshot.tick, self.last_tick, |from, to| self.inputs.covers(from, to));

        self.kind.apply(body, &snapshot.state);
        self.predicted.save(snapshot.tick, snapshot.state.clone());

        let kind = match plan {
            CorrectionPlan::Adopt => {
                self.stats.adopted += 1;
                self.replay_base = Some(snapshot.tick);
                CorrectionKind::Adopted
            }
            CorrectionPlan::Replay { after, through } => {
                let mut count = 0;
                for (tick, input) in self.inputs.range(after, through) {
                    self.kind.simulate(body, input, StepFlags::REPLAY, self.dt);
                    self.predicted.save(tick, self.kind.capture(body));
                    count += 1;
                }
                self.stats.replays += 1;
                self.stats.replayed_inputs += count;
                self.replay_base = Some(snapshot.tick);
                debug!(tick = snapshot.tick, replayed = count, "reconciled by replay");
                CorrectionKind::Replayed(count)
            }
            CorrectionPlan::HardReset { gap } => {
                self.stats.hard_resets += 1;
                // Predictions past the snapshot no longer derive from it
                self.replay_base = None;
                warn!(
                    tick = snapshot.tick,
                    gap,
                    horizon = ?self.inputs.capacity(),
                    "snapshot beyond replay horizon, hard reset"
                );
                CorrectionKind::HardReset
            }
        };

        self.inputs.clear_before(snapshot.tick + 1);
        self.reconciler.confirm(snapshot.tick);

        Some(Correction {
            tick: snapshot.tick,
            kind,
            before,
            after: self.kind.capture(body),
        })
    }

    /// Record and simulate the live input of `tick`
    ///
    /// Returns the input window to send to the server, oldest first.
    pub fn predict(&mut self, body: &mut B, tick: Tick, input: I) -> Vec<(Tick, I)> {
        if self.last_tick.is_some_and(|t| tick <= t) {
            warn!(tick, last = ?self.last_tick, "prediction tick not increasing");
        }
        self.inputs.save(tick, input.clone());
        self.kind.simulate(body, &input, StepFlags::LIVE, self.dt);
        self.predicted.save(tick, self.kind.capture(body));
        self.last_tick = Some(tick);
        self.reconciler.diverge();

        self.inputs
            .latest(tick, self.input_redundancy)
            .into_iter()
            .map(|(t, i)| (t, i.clone()))
            .collect()
    }

    /// Mutable access to the input history, for capture
    pub fn inputs_mut(&mut self) -> &mut RollbackBuffer<I> {
        &mut self.inputs
    }

    /// The input history
    pub fn inputs(&self) -> &RollbackBuffer<I> {
        &self.inputs
    }

    /// Reconciliation state
    pub fn state(&self) -> ReconcileState {
        self.reconciler.state()
    }

    /// Tick of the most recently applied snapshot
    pub fn last_applied(&self) -> Option<Tick> {
        self.reconciler.last_applied()
    }

    /// Newest locally simulated tick
    pub fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    /// Counters
    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    /// Occupancy of the unacknowledged input history
    ///
    /// A span close to the horizon means snapshots lag far behind the
    /// predicted tick and the next one may force a hard reset.
    pub fn history_stats(&self) -> BufferStats {
        self.inputs.stats()
    }

    /// Drop all history (the predicting role was lost or regained)
    pub fn reset(&mut self) {
        self.inputs.clear();
        self.predicted.clear();
        self.reconciler.reset();
        self.last_tick = None;
        self.replay_base = None;
    }

    /// Compare the authoritative state with what we predicted for that tick
    fn diagnose(&mut self, snapshot: &SnapshotMessage<S>) {
        let Some(predicted) = self.predicted.get(snapshot.tick) else {
            return;
        };
        let base = self.replay_base.filter(|b| Some(*b) == self.reconciler.last_applied());
        let comparable = compare::comparable(base, snapshot.exact_since);

        match compare::classify(predicted, &snapshot.state, comparable, self.determinism_epsilon) {
            Divergence::Match => {}
            Divergence::Misprediction => {
                self.stats.mispredictions += 1;
                trace!(tick = snapshot.tick, "misprediction");
            }
            Divergence::Nondeterminism => {
                self.stats.nondeterminism += 1;
                if cfg!(debug_assertions) {
                    error!(
                        tick = snapshot.tick,
                        kind = self.kind.name,
                        "prediction diverged from server with identical inputs; step is not deterministic"
                    );
                } else {
                    warn!(tick = snapshot.tick, kind = self.kind.name, "nondeterministic step");
                }
            }
        }
    }
}

impl<B, I, S> std::fmt::Debug for Predictor<B, I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("kind", &self.kind.name)
            .field("last_tick", &self.last_tick)
            .field("replay_base", &self.replay_base)
            .field("stats", &self.stats)
            .finish()
    }
}
