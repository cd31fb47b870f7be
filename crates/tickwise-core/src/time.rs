//! Time system for fixed-rate simulation
//!
//! Provides discrete time management for tick-synchronized netcode:
//! - `Tick` - Logical time unit, global per session
//! - `TickRate` - Fixed simulation rate, independent of render rate
//! - `TickClock` - Accumulator turning wall-clock frames into tick batches
//! - `TickEvent` - The ordered `Tick` / `PostTick` pair emitted per tick

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A discrete tick identifier (logical time unit)
pub type Tick = u64;

/// Fixed simulation rate in ticks per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickRate(u32);

impl TickRate {
    /// Create a tick rate, rejecting zero
    pub fn new(hz: u32) -> Result<Self> {
        if hz == 0 {
            return Err(Error::ZeroTickRate);
        }
        Ok(Self(hz))
    }

    /// Ticks per second
    pub fn hz(&self) -> u32 {
        self.0
    }

    /// Wall-clock duration of one tick
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.0 as u64)
    }

    /// Simulated seconds per tick, as handed to physics integration
    ///
    /// Derived from the rate alone so that every peer integrates with the
    /// same bit pattern.
    pub fn delta_seconds(&self) -> f32 {
        1.0 / self.0 as f32
    }
}

impl Default for TickRate {
    fn default() -> Self {
        Self(30)
    }
}

impl fmt::Display for TickRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz", self.0)
    }
}

/// One half of a tick's event pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickEvent {
    /// Fired before simulation of the tick (input, reconcile, move)
    Tick(Tick),
    /// Fired after simulation of the tick (snapshot, transmit)
    PostTick(Tick),
}

impl TickEvent {
    /// The tick this event belongs to
    pub fn tick(&self) -> Tick {
        match self {
            TickEvent::Tick(t) | TickEvent::PostTick(t) => *t,
        }
    }
}

/// Ticks that became due during one call to [`TickClock::advance`]
///
/// Tick numbers in a batch are contiguous and strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBatch {
    /// First tick of the batch
    pub first: Tick,
    /// Number of ticks in the batch (may be zero)
    pub count: u32,
    /// Wall-clock time discarded because the frame overran `max_ticks_per_frame`
    pub dropped: Duration,
}

impl TickBatch {
    /// Iterate over the tick numbers in this batch
    pub fn ticks(&self) -> impl Iterator<Item = Tick> {
        self.first..self.first + self.count as u64
    }

    /// Iterate over the `(Tick, PostTick)` event sequence for this batch
    pub fn events(&self) -> impl Iterator<Item = TickEvent> {
        self.ticks()
            .flat_map(|t| [TickEvent::Tick(t), TickEvent::PostTick(t)])
    }

    /// Check if no tick became due
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Fixed-rate scheduler turning render frames into whole ticks
///
/// Any number of frames (including zero) may pass between ticks. When wall
/// time runs ahead, several ticks are emitted in one frame; the backlog is
/// bounded by `max_ticks_per_frame` and the excess time is dropped rather
/// than skipping tick numbers.
#[derive(Debug, Clone)]
pub struct TickClock {
    /// Fixed simulation rate
    rate: TickRate,
    /// Next tick number to be emitted
    next_tick: Tick,
    /// Wall-clock time not yet consumed by a tick
    accumulator: Duration,
    /// Upper bound on ticks emitted per frame
    max_ticks_per_frame: u32,
    /// Last tick emitted
    last_tick: Option<Tick>,
}

impl TickClock {
    /// Create a clock whose first emitted tick is 1
    pub fn new(rate: TickRate, max_ticks_per_frame: u32) -> Self {
        Self::starting_at(rate, max_ticks_per_frame, 1)
    }

    /// Create a clock whose first emitted tick is `first_tick`
    ///
    /// Used by peers joining a session that is already running.
    pub fn starting_at(rate: TickRate, max_ticks_per_frame: u32, first_tick: Tick) -> Self {
        Self {
            rate,
            next_tick: first_tick,
            accumulator: Duration::ZERO,
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            last_tick: None,
        }
    }

    /// Feed elapsed wall-clock time and collect the ticks that are now due
    pub fn advance(&mut self, elapsed: Duration) -> TickBatch {
        let interval = self.rate.interval();
        self.accumulator += elapsed;

        let mut count = 0u32;
        while self.accumulator >= interval && count < self.max_ticks_per_frame {
            self.accumulator -= interval;
            count += 1;
        }

        // Still behind after the cap: drop whole ticks of backlog, keep the remainder
        let mut dropped = Duration::ZERO;
        if self.accumulator >= interval {
            let keep = Duration::from_nanos(
                (self.accumulator.as_nanos() % interval.as_nanos()) as u64,
            );
            dropped = self.accumulator - keep;
            self.accumulator = keep;
            tracing::debug!(?dropped, rate = %self.rate, "tick clock fell behind, dropping backlog");
        }

        let batch = TickBatch {
            first: self.next_tick,
            count,
            dropped,
        };
        self.next_tick += count as u64;
        if count > 0 {
            self.last_tick = Some(self.next_tick - 1);
        }
        batch
    }

    /// Emit exactly one tick regardless of wall time
    pub fn step(&mut self) -> Tick {
        let tick = self.next_tick;
        self.next_tick += 1;
        self.last_tick = Some(tick);
        tick
    }

    /// Move the next emitted tick forward to `tick`
    ///
    /// Used when a peer finds itself behind the session's tick. Skipped
    /// numbers get neither Tick nor PostTick. Never moves backwards; returns
    /// whether the clock moved.
    pub fn skip_to(&mut self, tick: Tick) -> bool {
        if tick <= self.next_tick {
            return false;
        }
        tracing::debug!(from = self.next_tick, to = tick, "tick clock skipped forward");
        self.next_tick = tick;
        true
    }

    /// The last tick emitted, or `None` before the first one
    pub fn current_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    /// The tick the next batch will start from
    pub fn next_tick(&self) -> Tick {
        self.next_tick
    }

    /// Fraction of the next tick already accumulated, in `[0.0, 1.0)`
    ///
    /// Useful as a render interpolation factor.
    pub fn alpha(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.rate.interval().as_secs_f32()
    }

    /// The fixed rate of this clock
    pub fn rate(&self) -> TickRate {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(hz: u32) -> TickClock {
        TickClock::new(TickRate::new(hz).unwrap(), 5)
    }

    #[test]
    fn test_skip_to_only_moves_forward() {
        let mut clock = clock(30);
        clock.step();
        assert!(clock.skip_to(100));
        assert!(!clock.skip_to(50));
        assert!(!clock.skip_to(100));
        assert_eq!(clock.step(), 100);
        assert_eq!(clock.current_tick(), Some(100));

        let joined = TickClock::starting_at(TickRate::new(30).unwrap(), 5, 40);
        assert_eq!(joined.next_tick(), 40);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(TickRate::new(0).is_err());
        assert_eq!(TickRate::new(60).unwrap().hz(), 60);
    }

    #[test]
    fn test_no_tick_before_interval() {
        let mut clock = clock(30);
        let batch = clock.advance(Duration::from_millis(10));
        assert!(batch.is_empty());
        assert_eq!(clock.current_tick(), None);
    }

    #[test]
    fn test_frames_accumulate_into_ticks() {
        let mut clock = clock(50); // 20ms per tick
        assert!(clock.advance(Duration::from_millis(15)).is_empty());

        let batch = clock.advance(Duration::from_millis(10));
        assert_eq!(batch.count, 1);
        assert_eq!(batch.first, 1);
        assert_eq!(clock.current_tick(), Some(1));
    }

    #[test]
    fn test_multiple_ticks_per_frame() {
        let mut clock = clock(50);
        let batch = clock.advance(Duration::from_millis(65));
        assert_eq!(batch.ticks().collect::<Vec<_>>(), vec![1, 2, 3]);

        let next = clock.advance(Duration::from_millis(20));
        assert_eq!(next.first, 4);
    }

    #[test]
    fn test_events_are_paired_and_ordered() {
        let mut clock = clock(50);
        let batch = clock.advance(Duration::from_millis(40));
        let events: Vec<_> = batch.events().collect();
        assert_eq!(
            events,
            vec![
                TickEvent::Tick(1),
                TickEvent::PostTick(1),
                TickEvent::Tick(2),
                TickEvent::PostTick(2),
            ]
        );
    }

    #[test]
    fn test_backlog_capped_without_skipping_numbers() {
        let mut clock = clock(50);
        let batch = clock.advance(Duration::from_secs(1));
        assert_eq!(batch.count, 5);
        assert!(batch.dropped > Duration::ZERO);

        // Tick numbering continues without a gap
        let next = clock.advance(Duration::from_millis(20));
        assert_eq!(next.first, 6);
        assert_eq!(next.count, 1);
    }

    #[test]
    fn test_starting_at() {
        let mut clock = TickClock::starting_at(TickRate::default(), 5, 100);
        assert_eq!(clock.step(), 100);
        assert_eq!(clock.step(), 101);
        assert_eq!(clock.current_tick(), Some(101));
    }

    #[test]
    fn test_delta_seconds() {
        let rate = TickRate::new(60).unwrap();
        assert_eq!(rate.delta_seconds(), 1.0 / 60.0);
    }
}
