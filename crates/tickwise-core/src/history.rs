//! Tick history trait for storing and retrieving per-tick records
//!
//! This trait is used by:
//! - `tickwise-rollback-buffer` for the bounded input/state buffer
//! - `tickwise-netcode` for input replay and server state history
//!
//! # Example
//!
//! ```rust,ignore
//! use tickwise_core::{Tick, TickHistory};
//!
//! struct MyHistory<T> {
//!     entries: Vec<(Tick, T)>,
//! }
//!
//! impl<T> TickHistory<T> for MyHistory<T> {
//!     fn save(&mut self, tick: Tick, value: T) {
//!         self.entries.push((tick, value));
//!     }
//!
//!     fn get(&self, tick: Tick) -> Option<&T> {
//!         self.entries.iter().find(|(t, _)| *t == tick).map(|(_, v)| v)
//!     }
//!
//!     // ... other methods
//! }
//! ```

use crate::Tick;

/// Trait for storing and retrieving records keyed by tick.
///
/// Implementations choose their retention strategy; records older than the
/// retention horizon may disappear at any time and callers must treat a
/// missing tick as "no longer available", never as an error.
pub trait TickHistory<T> {
    /// Store a record at the given tick, replacing any existing one.
    fn save(&mut self, tick: Tick, value: T);

    /// Get the record at exactly the given tick, if it exists.
    fn get(&self, tick: Tick) -> Option<&T>;

    /// Get the record at or before the given tick.
    ///
    /// Returns `(actual_tick, value)` where `actual_tick <= tick`.
    fn nearest_before(&self, tick: Tick) -> Option<(Tick, &T)>;

    /// Drop all records before the given tick.
    fn clear_before(&mut self, tick: Tick);

    /// Drop all records.
    fn clear(&mut self);

    /// Maximum number of records kept.
    ///
    /// Returns `None` for unbounded histories.
    fn capacity(&self) -> Option<usize>;

    /// Get the number of records currently stored.
    fn len(&self) -> usize;

    /// Check if the history is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the tick range of stored records.
    ///
    /// Returns `Some((oldest_tick, newest_tick))`, or `None` when empty.
    fn tick_range(&self) -> Option<(Tick, Tick)>;

    /// Check that every tick in `from..=to` has a record.
    ///
    /// An empty range (`from > to`) is trivially covered.
    fn covers(&self, from: Tick, to: Tick) -> bool {
        if from > to {
            return true;
        }
        match self.tick_range() {
            Some((oldest, newest)) if oldest <= from && to <= newest => {
                (from..=to).all(|t| self.get(t).is_some())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Simple unbounded implementation for testing
    struct SimpleHistory {
        entries: Vec<(Tick, u32)>,
    }

    impl SimpleHistory {
        fn new() -> Self {
            Self {
                entries: Vec::new(),
            }
        }
    }

    impl TickHistory<u32> for SimpleHistory {
        fn save(&mut self, tick: Tick, value: u32) {
            self.entries.retain(|(t, _)| *t != tick);
            self.entries.push((tick, value));
            self.entries.sort_by_key(|(t, _)| *t);
        }

        fn get(&self, tick: Tick) -> Option<&u32> {
            self.entries.iter().find(|(t, _)| *t == tick).map(|(_, v)| v)
        }

        fn nearest_before(&self, tick: Tick) -> Option<(Tick, &u32)> {
            self.entries
                .iter()
                .filter(|(t, _)| *t <= tick)
                .max_by_key(|(t, _)| *t)
                .map(|(t, v)| (*t, v))
        }

        fn clear_before(&mut self, tick: Tick) {
            self.entries.retain(|(t, _)| *t >= tick);
        }

        fn clear(&mut self) {
            self.entries.clear();
        }

        fn capacity(&self) -> Option<usize> {
            None
        }

        fn len(&self) -> usize {
            self.entries.len()
        }

        fn tick_range(&self) -> Option<(Tick, Tick)> {
            let first = self.entries.first()?.0;
            let last = self.entries.last()?.0;
            Some((first, last))
        }
    }

    #[test]
    fn test_nearest_before() {
        let mut history = SimpleHistory::new();
        history.save(10, 1);
        history.save(20, 2);

        assert_eq!(history.nearest_before(25), Some((20, &2)));
        assert_eq!(history.nearest_before(10), Some((10, &1)));
        assert!(history.nearest_before(5).is_none());
    }

    #[test]
    fn test_covers() {
        let mut history = SimpleHistory::new();
        for tick in 5..=8 {
            history.save(tick, tick as u32);
        }

        assert!(history.covers(5, 8));
        assert!(history.covers(6, 7));
        assert!(history.covers(9, 8)); // empty range
        assert!(!history.covers(4, 8));
        assert!(!history.covers(5, 9));

        history.clear_before(7);
        assert!(!history.covers(6, 8));
        assert!(history.covers(7, 8));
    }

    #[test]
    fn test_gap_not_covered() {
        let mut history = SimpleHistory::new();
        history.save(1, 1);
        history.save(3, 3);
        assert!(!history.covers(1, 3));
        assert_eq!(history.tick_range(), Some((1, 3)));
    }
}
