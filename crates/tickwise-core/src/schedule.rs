//! Tick-driven scheduling: listener arena and timer queue
//!
//! Entities are registered explicitly with a [`TickSchedule`] and iterated in
//! registration order on every `Tick` and `PostTick`, which gives a
//! deterministic order and a plain register/unregister lifecycle.
//!
//! Periodic side tasks (e.g. "change colour every second") are expressed as
//! entries in a [`TimerQueue`] that fires due payloads when the clock reaches
//! their tick.

use crate::Tick;
use std::fmt;

/// Receives the ordered event pair of every tick
pub trait TickListener {
    /// Simulation phase of the tick
    fn on_tick(&mut self, tick: Tick);

    /// After simulation of the tick has finished for every listener
    fn on_post_tick(&mut self, tick: Tick);
}

/// Handle returned by [`TickSchedule::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// Ordered arena of tick listeners
///
/// Generic over the listener type so callers can store richer trait objects
/// than [`TickListener`] alone.
pub struct TickSchedule<L: ?Sized> {
    /// Listeners in registration order
    listeners: Vec<(ListenerId, Box<L>)>,
    /// Next handle to hand out; handles are never reused
    next_id: u64,
}

impl<L: ?Sized> TickSchedule<L> {
    /// Create an empty schedule
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    /// Add a listener at the end of the iteration order
    pub fn register(&mut self, listener: Box<L>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener
    ///
    /// Returns the listener the first time, `None` on every later call.
    pub fn unregister(&mut self, id: ListenerId) -> Option<Box<L>> {
        let index = self.listeners.iter().position(|(l, _)| *l == id)?;
        Some(self.listeners.remove(index).1)
    }

    /// Check if a handle is still registered
    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|(l, _)| *l == id)
    }

    /// Get a registered listener
    pub fn get(&self, id: ListenerId) -> Option<&L> {
        self.listeners
            .iter()
            .find(|(l, _)| *l == id)
            .map(|(_, b)| b.as_ref())
    }

    /// Get a registered listener mutably
    pub fn get_mut(&mut self, id: ListenerId) -> Option<&mut L> {
        self.listeners
            .iter_mut()
            .find(|(l, _)| *l == id)
            .map(|(_, b)| b.as_mut())
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = (ListenerId, &L)> {
        self.listeners.iter().map(|(id, b)| (*id, b.as_ref()))
    }

    /// Iterate mutably in registration order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ListenerId, &mut L)> {
        self.listeners.iter_mut().map(|(id, b)| (*id, b.as_mut()))
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Check if no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<L: TickListener + ?Sized> TickSchedule<L> {
    /// Deliver one full tick: `on_tick` to everyone, then `on_post_tick` to everyone
    pub fn run_tick(&mut self, tick: Tick) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_tick(tick);
        }
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_post_tick(tick);
        }
    }
}

impl<L: ?Sized> Default for TickSchedule<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for TickSchedule<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickSchedule")
            .field("listeners", &self.listeners.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
struct Timer<E> {
    id: TimerId,
    due: Tick,
    /// Re-arm interval for repeating timers
    every: Option<u64>,
    payload: E,
}

/// Tick-granular timer queue
///
/// Payloads are handed back from [`TimerQueue::fire`] when their tick comes
/// up; the caller decides what a payload means.
#[derive(Debug, Clone)]
pub struct TimerQueue<E> {
    /// Pending timers sorted by due tick (ties keep insertion order)
    timers: Vec<Timer<E>>,
    next_id: u64,
}

impl<E: Clone> TimerQueue<E> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            timers: Vec::new(),
            next_id: 0,
        }
    }

    /// Fire `payload` once, `delay_ticks` after `current_tick`
    pub fn schedule_once(&mut self, payload: E, delay_ticks: u64, current_tick: Tick) -> TimerId {
        self.insert(current_tick + delay_ticks, None, payload)
    }

    /// Fire `payload` every `interval_ticks`, first at `current_tick + interval_ticks`
    pub fn schedule_every(
        &mut self,
        payload: E,
        interval_ticks: u64,
        current_tick: Tick,
    ) -> TimerId {
        let interval = interval_ticks.max(1);
        self.insert(current_tick + interval, Some(interval), payload)
    }

    /// Cancel a timer; returns false if it already fired (one-shot) or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Collect payloads due at or before `tick`, re-arming repeating timers
    pub fn fire(&mut self, tick: Tick) -> Vec<E> {
        let mut fired = Vec::new();
        let mut rearm = Vec::new();

        while self.timers.first().is_some_and(|t| t.due <= tick) {
            let timer = self.timers.remove(0);
            fired.push(timer.payload.clone());
            if let Some(every) = timer.every {
                // Catch up without firing more than once per call
                let mut next = timer.due + every;
                while next <= tick {
                    next += every;
                }
                rearm.push(Timer { due: next, ..timer });
            }
        }

        for timer in rearm {
            self.push_sorted(timer);
        }
        fired
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Payloads of all pending timers, soonest first
    pub fn payloads(&self) -> impl Iterator<Item = &E> {
        self.timers.iter().map(|t| &t.payload)
    }

    /// Check if nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn insert(&mut self, due: Tick, every: Option<u64>, payload: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.push_sorted(Timer {
            id,
            due,
            every,
            payload,
        });
        id
    }

    fn push_sorted(&mut self, timer: Timer<E>) {
        let index = self.timers.partition_point(|t| t.due <= timer.due);
        self.timers.insert(index, timer);
    }
}

impl<E: Clone> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
