//! Snapshot ordering and the reconciliation state machine
//!
//! The [`Reconciler`] decides which authoritative snapshots are worth
//! applying (strictly newer than anything applied, newest wins) and which
//! correction a snapshot calls for: a replay of buffered input, or a hard
//! reset when the history no longer covers the gap.
//!
//! The [`compare`] module holds the determinism diagnostic.

use crate::SnapshotMessage;
use std::fmt;
use tickwise_core::Tick;
use tracing::trace;

/// Where the predicting peer stands relative to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileState {
    /// Local state equals the last applied snapshot
    #[default]
    Confirmed,
    /// Local input has been simulated beyond the last snapshot
    Diverging,
    /// A newer snapshot is waiting to be applied on the next tick
    Correcting,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileState::Confirmed => write!(f, "confirmed"),
            ReconcileState::Diverging => write!(f, "diverging"),
            ReconcileState::Correcting => write!(f, "correcting"),
        }
    }
}

/// What happened to an offered snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotVerdict {
    /// Queued for the next tick
    Accepted,
    /// Queued, replacing an older pending snapshot
    Superseded { replaced: Tick },
    /// Not newer than what was applied or is pending; discarded
    Stale,
}

/// How to bring the local state up to date with a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionPlan {
    /// Snapshot is at or past the newest predicted tick; apply it as is
    Adopt,
    /// Apply, then re-simulate buffered inputs `after < tick <= through`
    Replay { after: Tick, through: Tick },
    /// History cannot cover the gap; apply the snapshot and accept the jump
    HardReset { gap: u64 },
}

/// Snapshot bookkeeping of one predicting or observing entity
#[derive(Debug, Clone)]
pub struct Reconciler<S> {
    state: ReconcileState,
    /// Tick of the most recently applied snapshot
    last_applied: Option<Tick>,
    /// Newest received, not yet applied snapshot
    pending: Option<SnapshotMessage<S>>,
    /// Maximum replay distance in ticks
    horizon: u64,
}

impl<S> Reconciler<S> {
    /// Create a reconciler that replays at most `horizon` ticks
    pub fn new(horizon: usize) -> Self {
        Self {
            state: ReconcileState::Confirmed,
            last_applied: None,
            pending: None,
            horizon: horizon as u64,
        }
    }

    /// Current state
    pub fn state(&self) -> ReconcileState {
        self.state
    }

    /// Tick of the most recently applied snapshot
    pub fn last_applied(&self) -> Option<Tick> {
        self.last_applied
    }

    /// Tick of the pending snapshot
    pub fn pending_tick(&self) -> Option<Tick> {
        self.pending.as_ref().map(|s| s.tick)
    }

    /// Offer a received snapshot
    ///
    /// Only snapshots strictly newer than both the last applied one and the
    /// pending one are kept, so application is monotonic regardless of
    /// arrival order.
    pub fn offer(&mut self, snapshot: SnapshotMessage<S>) -> SnapshotVerdict {
        if self.last_applied.is_some_and(|t| snapshot.tick <= t) {
            trace!(tick = snapshot.tick, "snapshot not newer than applied");
            return SnapshotVerdict::Stale;
        }
        let verdict = match self.pending_tick() {
            Some(pending) if snapshot.tick <= pending => return SnapshotVerdict::Stale,
            Some(pending) => SnapshotVerdict::Superseded { replaced: pending },
            None => SnapshotVerdict::Accepted,
        };
        self.pending = Some(snapshot);
        self.state = ReconcileState::Correcting;
        verdict
    }

    /// Take the pending snapshot for application
    pub fn take_pending(&mut self) -> Option<SnapshotMessage<S>> {
        self.pending.take()
    }

    /// Decide how to correct to a snapshot at `snapshot_tick` when the newest
    /// locally simulated tick is `predicted_through`
    ///
    /// `covered` reports whether the input history holds every tick in
    /// `snapshot_tick < tick <= predicted_through`.
    pub fn plan(
        &self,
        snapshot_tick: Tick,
        predicted_through: Option<Tick>,
        covered: impl FnOnce(Tick, Tick) -> bool,
    ) -> CorrectionPlan {
        let Some(through) = predicted_through.filter(|t| *t > snapshot_tick) else {
            return CorrectionPlan::Adopt;
        };
        let gap = through - snapshot_tick;
        if gap > self.horizon || !covered(snapshot_tick + 1, through) {
            CorrectionPlan::HardReset { gap }
        } else {
            CorrectionPlan::Replay {
                after: snapshot_tick,
                through,
            }
        }
    }

    /// Record that the snapshot of `tick` has been applied
    pub fn confirm(&mut self, tick: Tick) {
        self.last_applied = Some(tick);
        self.state = match self.pending {
            Some(_) => ReconcileState::Correcting,
            None => ReconcileState::Confirmed,
        };
    }

    /// Record that fresh local input has been simulated
    pub fn diverge(&mut self) {
        if self.state == ReconcileState::Confirmed {
            self.state = ReconcileState::Diverging;
        }
    }

    /// Forget everything (role change)
    pub fn reset(&mut self) {
        self.state = ReconcileState::Confirmed;
        self.last_applied = None;
        self.pending = None;
    }
}

/// Determinism diagnostic
///
/// A snapshot can only be compared against the local prediction of the same
/// tick when both sides simulated identical inputs from an identical start.
/// Differences in that case reveal a nondeterministic `step`; differences
/// otherwise are ordinary mispredictions.
pub mod compare {
    use tickwise_core::{Approx, Tick};

    /// Outcome of comparing a prediction with the authoritative state
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Divergence {
        /// Within epsilon
        Match,
        /// Differs, but the prediction used different input or start state
        Misprediction,
        /// Differs although inputs and start state were identical
        Nondeterminism,
    }

    /// Classify the difference between `predicted` and `authoritative`
    ///
    /// `comparable` is true when the prediction started from the previous
    /// snapshot and the server used genuine owner input for every tick since.
    pub fn classify<S: Approx>(
        predicted: &S,
        authoritative: &S,
        comparable: bool,
        epsilon: f32,
    ) -> Divergence {
        if predicted.approx_eq(authoritative, epsilon) {
            Divergence::Match
        } else if comparable {
            Divergence::Nondeterminism
        } else {
            Divergence::Misprediction
        }
    }

    /// Check whether a snapshot at some tick with `exact_since` can be
    /// compared, given the prediction replayed from the snapshot at `base`
    pub fn comparable(base: Option<Tick>, exact_since: Option<Tick>) -> bool {
        match (base, exact_since) {
            (Some(base), Some(since)) => since <= base + 1,
            _ => false,
        }
    }
}
