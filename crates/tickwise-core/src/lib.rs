//! Tickwise Core - Fixed-rate simulation primitives
//!
//! This crate provides the shared building blocks for tick-synchronized
//! prediction and reconciliation:
//! - Tick type, fixed tick rate and the `TickClock` drift-correcting scheduler
//! - Explicit listener registration (`TickSchedule`) and a `TimerQueue`
//! - Entity and peer identifiers, `AuthorityRole`
//! - `EntityKind` descriptors holding the registered Move/Reconcile functions
//! - The `TickHistory` trait for tick-indexed buffers
//! - `Approx` comparisons for change detection and desync checks
//! - `NetConfig` and per-field `ChangePolicy`
//!
//! ## Tick ordering
//!
//! Within one peer, `Tick(n)` always precedes `PostTick(n)`, and tick numbers
//! are strictly increasing. Nothing in this crate blocks; handlers are
//! expected to finish synchronously before the next event is delivered.

mod approx;
mod config;
mod error;
mod history;
mod identity;
mod kind;
mod role;
pub mod schedule;
pub mod time;

pub use approx::Approx;
pub use config::{ChangePolicy, Channel, NetConfig};
pub use error::{Error, Result};
pub use history::TickHistory;
pub use identity::{EntityId, PeerId};
pub use kind::{CaptureFn, EntityKind, IntegrateFn, ReconcileFn, StepFlags, StepFn};
pub use role::AuthorityRole;
pub use schedule::{ListenerId, TickListener, TickSchedule, TimerId, TimerQueue};
pub use time::{Tick, TickBatch, TickClock, TickEvent, TickRate};
