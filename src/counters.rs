//! The in-memory counter table.
//!
//! Each named counter carries two numbers:
//!
//! - `total`: the value after every local increment and decrement since the
//!   counter was created
//! - `unflushed`: the net change not yet merged into the remote store
//!
//! ```text
//!            increment/decrement             snapshot taken
//!   Clean ─────────────────────────► Dirty ─────────────────► Flushing
//!  (Δ = 0)                          (Δ ≠ 0)                       │
//!     ▲                                ▲                          │
//!     │            settle(snapshot)    │   conflict / failure     │
//!     └────────────────────────────────┼──────────────────────────┘
//!                                      └── (Δ keeps any increments
//!                                           that arrived meanwhile)
//! ```
//!
//! [`CounterTable`] is not synchronized. The
//! [`Accumulator`](crate::accumulator::Accumulator) owns it behind a single
//! mutex shared with the reconciler.
//!
//! # Settling
//!
//! A flush snapshots the delta of every dirty counter as a [`PendingFlush`],
//! releases the lock for the network round trip, then calls
//! [`settle`](CounterTable::settle). Settling subtracts exactly the snapshotted
//! delta instead of zeroing it, so increments that landed during the round trip
//! stay pending for the next cycle.
//!
//! Every [`clear`](CounterTable::clear) bumps an epoch. Snapshots taken before a
//! clear are ignored by `settle`, so a flush racing a clear cannot subtract from
//! a counter that was re-created afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The table as shared between the accumulator and the reconciler.
pub(crate) type SharedTable = Arc<Mutex<CounterTable>>;

/// Locks a shared table, recovering from poisoning.
#[inline]
pub(crate) fn lock(table: &Mutex<CounterTable>) -> MutexGuard<'_, CounterTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The state of a single counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterEntry {
    /// In-memory value after every local mutation.
    pub total: i64,
    /// Net change not yet merged into the remote store.
    pub unflushed: i64,
}

impl CounterEntry {
    /// Returns `true` if the counter has nothing to flush.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.unflushed == 0
    }
}

/// A snapshot of one dirty counter, taken at the start of a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFlush {
    /// Counter name, also the remote attribute key.
    pub name: String,
    /// In-memory total at snapshot time.
    pub total: i64,
    /// Unflushed delta at snapshot time.
    pub delta: i64,
    epoch: u64,
}

/// Mapping from counter name to its [`CounterEntry`].
#[derive(Debug, Default)]
pub struct CounterTable {
    entries: HashMap<String, CounterEntry>,
    epoch: u64,
}

impl CounterTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to both numbers of `name`, creating the counter if absent.
    ///
    /// Returns the updated total. Arithmetic wraps on overflow.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use accumulatori::counters::CounterTable;
    ///
    /// let mut table = CounterTable::new();
    /// assert_eq!(table.apply("car-7", 3), 3);
    /// assert_eq!(table.apply("car-7", -1), 2);
    /// assert_eq!(table.get("car-7").unwrap().unflushed, 2);
    /// ```
    pub fn apply(&mut self, name: &str, delta: i64) -> i64 {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.total = entry.total.wrapping_add(delta);
                entry.unflushed = entry.unflushed.wrapping_add(delta);
                entry.total
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    CounterEntry {
                        total: delta,
                        unflushed: delta,
                    },
                );
                delta
            }
        }
    }

    /// Returns the entry for `name`, if any.
    #[inline]
    pub fn get(&self, name: &str) -> Option<CounterEntry> {
        self.entries.get(name).copied()
    }

    /// Number of counters in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table holds no counters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots every counter with a non-zero unflushed delta.
    pub fn dirty(&self) -> Vec<PendingFlush> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_clean())
            .map(|(name, entry)| PendingFlush {
                name: name.clone(),
                total: entry.total,
                delta: entry.unflushed,
                epoch: self.epoch,
            })
            .collect()
    }

    /// Marks the snapshotted delta of `pending` as flushed.
    ///
    /// Returns `false` if the snapshot predates a [`clear`](Self::clear) or the
    /// counter no longer exists.
    pub fn settle(&mut self, pending: &PendingFlush) -> bool {
        if pending.epoch != self.epoch {
            return false;
        }
        match self.entries.get_mut(&pending.name) {
            Some(entry) => {
                entry.unflushed = entry.unflushed.wrapping_sub(pending.delta);
                true
            }
            None => false,
        }
    }

    /// Number of counters still carrying a non-zero unflushed delta.
    pub fn unflushed_count(&self) -> usize {
        self.entries.values().filter(|e| !e.is_clean()).count()
    }

    /// Removes every counter without flushing.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Iterates over `(name, entry)` pairs in arbitrary order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, CounterEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let table = CounterTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.get("car-7"), None);
    }

    #[test]
    fn test_lazy_creation() {
        let mut table = CounterTable::new();
        assert_eq!(table.apply("car-7", 5), 5);
        assert_eq!(
            table.get("car-7"),
            Some(CounterEntry {
                total: 5,
                unflushed: 5
            })
        );
    }

    #[test]
    fn test_decrement_creates_negative() {
        let mut table = CounterTable::new();
        assert_eq!(table.apply("car-7", -2), -2);
        assert_eq!(table.get("car-7").unwrap().unflushed, -2);
    }

    #[test]
    fn test_dirty_skips_clean() {
        let mut table = CounterTable::new();
        table.apply("a", 1);
        table.apply("b", 1);
        table.apply("b", -1);
        let dirty = table.dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].name, "a");
        assert_eq!(table.unflushed_count(), 1);
    }

    #[test]
    fn test_settle_keeps_concurrent_delta() {
        let mut table = CounterTable::new();
        table.apply("car-7", 3);
        let pending = table.dirty().pop().unwrap();

        // increments arriving while the flush is in flight
        table.apply("car-7", 2);

        assert!(table.settle(&pending));
        assert_eq!(
            table.get("car-7"),
            Some(CounterEntry {
                total: 5,
                unflushed: 2
            })
        );
    }

    #[test]
    fn test_settle_after_clear_is_ignored() {
        let mut table = CounterTable::new();
        table.apply("car-7", 3);
        let pending = table.dirty().pop().unwrap();

        table.clear();
        table.apply("car-7", 1);

        assert!(!table.settle(&pending));
        assert_eq!(table.get("car-7").unwrap().unflushed, 1);
    }

    #[test]
    fn test_settle_missing_counter() {
        let mut table = CounterTable::new();
        let pending = PendingFlush {
            name: "ghost".into(),
            total: 1,
            delta: 1,
            epoch: 0,
        };
        assert!(!table.settle(&pending));
    }

    #[test]
    fn test_clear() {
        let mut table = CounterTable::new();
        table.apply("a", 1);
        table.apply("b", 2);
        table.clear();
        assert!(table.is_empty());
        assert!(table.dirty().is_empty());
    }

    #[test]
    fn test_wrapping() {
        let mut table = CounterTable::new();
        table.apply("max", i64::MAX);
        assert_eq!(table.apply("max", 1), i64::MIN);
    }

    #[test]
    fn test_entries() {
        let mut table = CounterTable::new();
        table.apply("a", 1);
        table.apply("b", -1);
        let mut names: Vec<&str> = table.entries().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
