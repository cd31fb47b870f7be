//! Entity-kind descriptors
//!
//! Gameplay code registers the simulation functions of an entity type once,
//! as plain function pointers. The engine invokes them with explicit flags
//! instead of calling overridable hooks, so the same `step` serves live
//! input, authoritative simulation and replay during reconciliation.

use std::fmt;

/// Flags passed to every invocation of the simulation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepFlags {
    /// Called by the authoritative peer
    ///
    /// Physics must not branch on this; it only tells gameplay code where
    /// the input came from.
    pub as_server: bool,
    /// Re-simulation of historical input during reconciliation
    ///
    /// One-shot side effects (sound, VFX, event triggers) should be skipped
    /// when set; movement and physics must still be applied.
    pub replaying: bool,
}

impl StepFlags {
    /// Fresh input on the predicting peer
    pub const LIVE: StepFlags = StepFlags {
        as_server: false,
        replaying: false,
    };

    /// Replay of buffered input on the predicting peer
    pub const REPLAY: StepFlags = StepFlags {
        as_server: false,
        replaying: true,
    };

    /// Authoritative simulation on the server
    pub const SERVER: StepFlags = StepFlags {
        as_server: true,
        replaying: false,
    };
}

/// The simulation step ("Move"): apply one input record to the body
pub type StepFn<B, I> = fn(&mut B, &I, StepFlags);

/// Overwrite every simulation-relevant field of the body from a snapshot
pub type ReconcileFn<B, S> = fn(&mut B, &S);

/// Capture every simulation-relevant field of the body
pub type CaptureFn<B, S> = fn(&B) -> S;

/// External physics integration, run once after every step
pub type IntegrateFn<B> = fn(&mut B, f32);

/// Registered simulation functions of one entity type
///
/// - `B`: the body (engine-owned entity state the functions mutate)
/// - `I`: the input record, default-constructible for "no input"
/// - `S`: the snapshot; must cover every field that feeds back into `step`
pub struct EntityKind<B, I, S> {
    /// Human-readable type name, used in logs
    pub name: &'static str,
    /// Simulation step
    pub step: StepFn<B, I>,
    /// Snapshot application
    pub reconcile: ReconcileFn<B, S>,
    /// Snapshot capture
    pub capture: CaptureFn<B, S>,
    /// Optional physics integration
    pub integrate: Option<IntegrateFn<B>>,
}

impl<B, I, S> EntityKind<B, I, S> {
    /// Register the three mandatory functions of an entity type
    pub fn new(
        name: &'static str,
        step: StepFn<B, I>,
        reconcile: ReconcileFn<B, S>,
        capture: CaptureFn<B, S>,
    ) -> Self {
        Self {
            name,
            step,
            reconcile,
            capture,
            integrate: None,
        }
    }

    /// Attach a physics integration step
    pub fn with_integrate(mut self, integrate: IntegrateFn<B>) -> Self {
        self.integrate = Some(integrate);
        self
    }

    /// Run one full simulation tick: step, then physics
    pub fn simulate(&self, body: &mut B, input: &I, flags: StepFlags, dt: f32) {
        (self.step)(body, input, flags);
        if let Some(integrate) = self.integrate {
            integrate(body, dt);
        }
    }

    /// Overwrite the body from a snapshot
    pub fn apply(&self, body: &mut B, snapshot: &S) {
        (self.reconcile)(body, snapshot);
    }

    /// Capture the body into a snapshot
    pub fn capture(&self, body: &B) -> S {
        (self.capture)(body)
    }
}

// Function pointers are Copy regardless of B, I, S
impl<B, I, S> Clone for EntityKind<B, I, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B, I, S> Copy for EntityKind<B, I, S> {}

impl<B, I, S> fmt::Debug for EntityKind<B, I, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityKind")
            .field("name", &self.name)
            .field("integrate", &self.integrate.is_some())
            .finish()
    }
}
