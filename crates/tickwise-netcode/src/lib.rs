//! Tickwise Netcode - Client-side prediction with server reconciliation
//!
//! This crate keeps a server-authoritative simulation responsive on the
//! client that controls an entity:
//!
//! - **Prediction**: The owner simulates its own input immediately
//! - **Reconciliation**: Authoritative snapshots rewind the owner's state,
//!   and buffered inputs are replayed on top
//! - **Authority**: The server simulates everything; one client per entity
//!   predicts; everyone else observes
//! - **Change detection**: Snapshots and replicated fields are only sent when
//!   they change, with bounded repeats against loss
//! - **Smoothing**: Corrections and observed motion are blended for display
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────── Client (owner) ─────────────────────────┐
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ InputCapture │──▶│  Predictor   │──▶│ CorrectionSmoother   │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────────┘  │
//! │         │                  ▲                                     │
//! │         ▼                  │ SnapshotMessage                     │
//! │   InputMessage        Reconciler                                 │
//! └─────────┼──────────────────┼─────────────────────────────────────┘
//!           ▼                  │
//! ┌─────────┼──────────────────┼────────── Server ───────────────────┐
//! │  AuthorityResolver ─▶ AuthoritativeSim ─▶ DirtyTracker           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use tickwise_core::{EntityId, EntityKind, NetConfig, PeerId, StepFlags, Tick};
//! use tickwise_netcode::{owned_by, LoopbackNetwork, NetEntity, Session};
//!
//! #[derive(Default)]
//! struct Ball { x: f32 }
//!
//! fn step(ball: &mut Ball, push: &f32, _flags: StepFlags) { ball.x += *push; }
//! fn reconcile(ball: &mut Ball, x: &f32) { ball.x = *x; }
//! fn capture(ball: &Ball) -> f32 { ball.x }
//!
//! let kind = EntityKind::new("ball", step, reconcile, capture);
//! let config = NetConfig::default();
//! let network = LoopbackNetwork::new();
//! let client_id = PeerId::new(1);
//!
//! let mut server = Session::new(config.clone(), network.endpoint(PeerId::SERVER)).unwrap();
//! let mut client = Session::new(config.clone(), network.endpoint(client_id)).unwrap();
//! server.connect_peer(client_id);
//!
//! let id = EntityId::new(1);
//! server
//!     .spawn(NetEntity::new(id, kind, Ball::default(), PeerId::SERVER, owned_by(Some(client_id)), &config))
//!     .unwrap();
//! client
//!     .spawn(
//!         NetEntity::new(id, kind, Ball::default(), client_id, owned_by(Some(client_id)), &config)
//!             .with_input(|_tick: Tick| Some(0.5f32)),
//!     )
//!     .unwrap();
//!
//! for _ in 0..4 {
//!     client.step();
//!     server.step();
//! }
//! let ball = server.entities().get::<Ball, f32, f32>(id).unwrap();
//! assert_eq!(ball.body().x, 2.0);
//! ```

mod authoritative;
mod authority;
mod dirty;
mod entity;
mod error;
mod input_buffer;
mod interpolation;
mod prediction;
pub mod reconciliation;
mod session;
mod sync_var;
pub mod transport;

pub use authoritative::{AuthoritativeSim, OutgoingSnapshot, ServerPhase, ServerStats};
pub use authority::{AuthorityResolver, Ownership, OwnershipChange, RpcTarget};
pub use dirty::{DirtyTracker, SendReason, Transmit};
pub use entity::{InputRecord, NetEntity, Replicated, SnapshotRecord};
pub use error::{Error, Result};
pub use input_buffer::{InputCapture, InputSource, NoInput};
pub use interpolation::{CorrectionSmoother, Interpolator, Lerp};
pub use prediction::{Correction, CorrectionKind, PredictionStats, Predictor};
pub use reconciliation::{CorrectionPlan, ReconcileState, Reconciler, SnapshotVerdict};
pub use session::{owned_by, EntityRegistry, Session, SessionStats, Task};
pub use sync_var::{OnChange, ReadPermission, ReplicatedField, SyncVar};
pub use transport::{
    FieldMessage, InputMessage, LoopbackError, LoopbackNetwork, LoopbackTransport, Packet,
    PacketKind, SnapshotMessage, Transport,
};

// Re-export core types for convenience
pub use tickwise_core::{Channel, TickHistory};
pub use tickwise_rollback_buffer::{BufferStats, RollbackBuffer};
