//! Tickwise Rollback Buffer - Bounded ring buffer for per-tick history
//!
//! This crate provides the Input/State Buffer: a fixed-size history of
//! records indexed by tick, sized to the retention horizon.
//!
//! # Features
//!
//! - **Bounded memory**: Fixed-size ring buffer, no unbounded growth
//! - **O(1) insertion and lookup**: The slot is `tick % capacity`
//! - **Automatic eviction**: Records older than the horizon are overwritten
//!
//! # Example
//!
//! ```rust
//! use tickwise_core::TickHistory;
//! use tickwise_rollback_buffer::RollbackBuffer;
//!
//! // Hold 64 ticks of input history
//! let mut buffer = RollbackBuffer::new(64);
//!
//! buffer.save(100, [1.0f32, 0.0]);
//! buffer.save(101, [1.0f32, 0.0]);
//!
//! assert!(buffer.get(100).is_some());
//! assert_eq!(buffer.range(100, 101).count(), 1);
//! ```

use tickwise_core::{Tick, TickHistory};

/// A ring buffer for storing the most recent per-tick records
///
/// Records more than `capacity` ticks older than the newest one are evicted
/// automatically, because they share a slot with a newer tick.
#[derive(Debug, Clone)]
pub struct RollbackBuffer<T> {
    /// Ring buffer storage: (tick, record); `None` means the slot is empty
    slots: Vec<Option<(Tick, T)>>,
    /// Number of records currently stored
    count: usize,
    /// Capacity (max records)
    capacity: usize,
}

impl<T> RollbackBuffer<T> {
    /// Create a new rollback buffer with the given capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Retention horizon in ticks (typically round trip plus jitter)
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; `NetConfig::validate` rejects that earlier.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            count: 0,
            capacity,
        }
    }

    /// Get the slot index for a given tick
    fn tick_to_index(&self, tick: Tick) -> usize {
        (tick % self.capacity as u64) as usize
    }

    /// Iterate records with `after < tick <= through`, in ascending tick order
    ///
    /// Missing ticks are skipped; use [`TickHistory::covers`] to detect gaps.
    pub fn range(&self, after: Tick, through: Tick) -> impl Iterator<Item = (Tick, &T)> {
        // Nothing older than `capacity` ticks before `through` can still be stored
        let oldest_possible = through.saturating_sub(self.capacity as u64 - 1);
        let start = after.saturating_add(1).max(oldest_possible);
        (start..=through).filter_map(move |t| self.get(t).map(|v| (t, v)))
    }

    /// Up to `n` most recent records at or before `through`, oldest first
    pub fn latest(&self, through: Tick, n: usize) -> Vec<(Tick, &T)> {
        let mut out: Vec<_> = (0..n.min(self.capacity) as u64)
            .filter_map(|back| through.checked_sub(back))
            .filter_map(|t| self.get(t).map(|v| (t, v)))
            .collect();
        out.reverse();
        out
    }

    /// Get all stored records (oldest to newest)
    pub fn iter(&self) -> impl Iterator<Item = (Tick, &T)> {
        let mut records: Vec<_> = self
            .slots
            .iter()
            .filter_map(|s| s.as_ref().map(|(t, v)| (*t, v)))
            .collect();
        records.sort_by_key(|(t, _)| *t);
        records.into_iter()
    }

    /// Get statistics about the buffer
    pub fn stats(&self) -> BufferStats {
        let (oldest, newest) = self.tick_range().unwrap_or((0, 0));
        BufferStats {
            capacity: self.capacity,
            count: self.count,
            oldest_tick: oldest,
            newest_tick: newest,
        }
    }
}

impl<T> TickHistory<T> for RollbackBuffer<T> {
    fn save(&mut self, tick: Tick, value: T) {
        let index = self.tick_to_index(tick);

        if self.slots[index].is_none() {
            self.count += 1;
        }
        self.slots[index] = Some((tick, value));
    }

    fn get(&self, tick: Tick) -> Option<&T> {
        let index = self.tick_to_index(tick);
        self.slots[index]
            .as_ref()
            .filter(|(t, _)| *t == tick)
            .map(|(_, v)| v)
    }

    fn nearest_before(&self, tick: Tick) -> Option<(Tick, &T)> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .filter(|(t, _)| *t <= tick)
            .max_by_key(|(t, _)| *t)
            .map(|(t, v)| (*t, v))
    }

    fn clear_before(&mut self, tick: Tick) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|(t, _)| *t < tick) {
                *slot = None;
                self.count -= 1;
            }
        }
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.count = 0;
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn len(&self) -> usize {
        self.count
    }

    fn tick_range(&self) -> Option<(Tick, Tick)> {
        let mut ticks = self.slots.iter().flatten().map(|(t, _)| *t);
        let first = ticks.next()?;
        Some(ticks.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }
}

impl<T> Default for RollbackBuffer<T> {
    fn default() -> Self {
        Self::new(64) // ~2 seconds at 30Hz
    }
}

/// Statistics about the rollback buffer
#[derive(Debug, Clone, Copy)]
pub struct BufferStats {
    /// Maximum capacity
    pub capacity: usize,
    /// Current number of stored records
    pub count: usize,
    /// Oldest tick in the buffer
    pub oldest_tick: Tick,
    /// Newest tick in the buffer
    pub newest_tick: Tick,
}

impl BufferStats {
    /// Get the tick span (newest - oldest)
    pub fn tick_span(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.newest_tick - self.oldest_tick
        }
    }

    /// Get the fill percentage (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f32 {
        self.count as f32 / self.capacity as f32
    }
}
