//! The write-back counter accumulator.
//!
//! [`Accumulator`] is the façade applications use. Increments and decrements
//! only touch the in-memory [`CounterTable`](crate::counters::CounterTable) and
//! never wait on the network; a [`FlushScheduler`] periodically hands the
//! accumulated deltas to the [`Reconciler`], which merges them into the remote
//! [`AttributeStore`] with compare-and-swap writes.
//!
//! ```text
//!   request threads                         background task
//!   ───────────────                         ───────────────
//!   increment ─┐                            FlushScheduler tick
//!   decrement ─┼──► Mutex<CounterTable> ◄──── Reconciler ────► AttributeStore
//!   get       ─┘      (total, unflushed)       (get / conditional put)
//! ```
//!
//! # Durability
//!
//! Counters live in memory until flushed. [`Accumulator::clear`] discards every
//! counter **without flushing**; call [`Accumulator::flush_now`] first if the
//! pending deltas must reach the store. Deltas that were never flushed are lost
//! when the process exits unless [`Accumulator::shutdown`] runs with
//! `flush_on_shutdown` enabled.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use accumulatori::accumulator::Accumulator;
//! use accumulatori::config::AccumulatorConfig;
//! use accumulatori::store::MemoryStore;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let config = AccumulatorConfig::new("p1lapchart").with_flush_interval(Duration::ZERO);
//! let counters = Accumulator::connect(store, config).await.unwrap();
//!
//! counters.incr_counter("car-7");
//! counters.increment("car-7", 2);
//! assert_eq!(counters.get_counter("car-7"), Some(3));
//!
//! assert_eq!(counters.flush_now().await, 0);
//! assert_eq!(counters.global_counters().await.unwrap(), vec![("car-7".to_string(), 3)]);
//! # });
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::AccumulatorConfig;
use crate::counters::{lock, CounterEntry, CounterTable, SharedTable};
use crate::error::{Error, Result, StoreError};
use crate::reconciler::{FlushReport, FlushStatsSnapshot, Reconciler};
use crate::scheduler::FlushScheduler;
use crate::store::AttributeStore;

/// Point-in-time view of one counter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterSnapshot {
    /// Counter name.
    pub name: String,
    /// In-memory total.
    pub total: i64,
    /// Delta not yet merged into the remote store.
    pub unflushed: i64,
}

/// In-memory counters written back to a remote attribute store.
pub struct Accumulator<S: AttributeStore + 'static> {
    counters: SharedTable,
    reconciler: Arc<Reconciler<S>>,
    scheduler: Mutex<Option<FlushScheduler>>,
    flush_on_shutdown: bool,
}

impl<S: AttributeStore + 'static> Accumulator<S> {
    /// Creates the remote table and starts the flush scheduler.
    ///
    /// Table creation is idempotent on the store side; a failure here is fatal
    /// and returned as [`Error::TableCreation`]. The scheduler is only started
    /// when the configured interval is non-zero.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(store: Arc<S>, config: AccumulatorConfig) -> Result<Self> {
        config.validate()?;

        tokio::time::timeout(config.request_timeout, store.create_table(&config.table))
            .await
            .unwrap_or(Err(StoreError::Timeout(config.request_timeout)))
            .map_err(|source| Error::TableCreation {
                table: config.table.clone(),
                source,
            })?;
        info!(table = %config.table, "counter table ready");

        let counters: SharedTable = Arc::new(Mutex::new(CounterTable::new()));
        let reconciler = Arc::new(Reconciler::new(
            store,
            config.table,
            Arc::clone(&counters),
            config.request_timeout,
        ));

        let accumulator = Self {
            counters,
            reconciler,
            scheduler: Mutex::new(None),
            flush_on_shutdown: config.flush_on_shutdown,
        };
        accumulator.reschedule(config.flush_interval);
        Ok(accumulator)
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<FlushScheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the running scheduler, if any, with one ticking at `interval`.
    fn reschedule(&self, interval: Duration) {
        let mut slot = self.scheduler();
        if let Some(old) = slot.take() {
            old.cancel();
        }
        if !interval.is_zero() {
            *slot = Some(FlushScheduler::start(Arc::clone(&self.reconciler), interval));
        }
    }

    /// Adds `n` to `name`, creating the counter if absent.
    ///
    /// Returns the in-memory total, which may differ from the remote value
    /// when other processes write to the same table.
    pub fn increment(&self, name: &str, n: i64) -> i64 {
        lock(&self.counters).apply(name, n)
    }

    /// Subtracts `n` from `name`, creating the counter if absent.
    pub fn decrement(&self, name: &str, n: i64) -> i64 {
        lock(&self.counters).apply(name, n.wrapping_neg())
    }

    /// Increments `name` by one.
    pub fn incr_counter(&self, name: &str) -> i64 {
        self.increment(name, 1)
    }

    /// Decrements `name` by one.
    pub fn decr_counter(&self, name: &str) -> i64 {
        self.decrement(name, 1)
    }

    /// Returns the in-memory total of `name`. Never contacts the store.
    pub fn get_counter(&self, name: &str) -> Option<i64> {
        lock(&self.counters).get(name).map(|e| e.total)
    }

    /// Returns the delta of `name` not yet merged into the store.
    pub fn unflushed(&self, name: &str) -> Option<i64> {
        lock(&self.counters).get(name).map(|e| e.unflushed)
    }

    /// Returns both numbers tracked for `name`.
    pub fn entry(&self, name: &str) -> Option<CounterEntry> {
        lock(&self.counters).get(name)
    }

    /// Number of counters held in memory.
    pub fn len(&self) -> usize {
        lock(&self.counters).len()
    }

    /// Returns `true` if no counters are held in memory.
    pub fn is_empty(&self) -> bool {
        lock(&self.counters).is_empty()
    }

    /// Discards every in-memory counter.
    ///
    /// Pending deltas are **not** flushed and are lost. Call
    /// [`flush_now`](Self::flush_now) first when they must reach the store.
    pub fn clear(&self) {
        let mut counters = lock(&self.counters);
        let dropped = counters.unflushed_count();
        counters.clear();
        if dropped > 0 {
            debug!(dropped, "cleared counters with unflushed deltas");
        }
    }

    /// Runs a flush cycle now and returns how many counters remain unflushed.
    ///
    /// Waits for a scheduled cycle in progress to finish first.
    pub async fn flush_now(&self) -> usize {
        self.reconciler.flush_cycle().await.still_unflushed
    }

    /// Runs a flush cycle now and returns its full report.
    pub async fn flush_report(&self) -> FlushReport {
        self.reconciler.flush_cycle().await
    }

    /// Changes the period of scheduled flushes, in milliseconds.
    ///
    /// The current timer is cancelled and replaced; a cycle already running
    /// completes. Zero disables scheduled flushing.
    pub fn configure_flush_interval(&self, millis: u64) {
        let interval = Duration::from_millis(millis);
        self.reschedule(interval);
        info!(?interval, "flush interval reconfigured");
    }

    /// The period of scheduled flushes, or `None` when disabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        self.scheduler().as_ref().map(FlushScheduler::interval)
    }

    /// Reads every counter stored in the remote table.
    ///
    /// Diagnostic only; this issues a full table scan.
    pub async fn global_counters(&self) -> Result<Vec<(String, i64)>> {
        self.reconciler.global_counters().await
    }

    /// Snapshots every in-memory counter, sorted by name.
    pub fn snapshot(&self) -> Vec<CounterSnapshot> {
        let mut snapshot: Vec<CounterSnapshot> = lock(&self.counters)
            .entries()
            .map(|(name, entry)| CounterSnapshot {
                name: name.to_string(),
                total: entry.total,
                unflushed: entry.unflushed,
            })
            .collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
    }

    /// Lifetime flush statistics.
    pub fn stats(&self) -> FlushStatsSnapshot {
        self.reconciler.stats()
    }

    /// Name of the remote table.
    pub fn table_name(&self) -> &str {
        self.reconciler.table_name()
    }

    /// Stops the scheduler and waits for it to exit.
    ///
    /// With `flush_on_shutdown` enabled a final flush cycle runs afterwards,
    /// and its report is returned.
    pub async fn shutdown(&self) -> Option<FlushReport> {
        let scheduler = self.scheduler().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        if self.flush_on_shutdown {
            let report = self.reconciler.flush_cycle().await;
            info!(still_unflushed = report.still_unflushed, "final flush complete");
            Some(report)
        } else {
            None
        }
    }
}

impl<S: AttributeStore + 'static> Drop for Accumulator<S> {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler().take() {
            scheduler.cancel();
        }
    }
}

impl<S: AttributeStore + 'static> std::fmt::Debug for Accumulator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accumulator")
            .field("table", &self.table_name())
            .field("counters", &self.len())
            .field("flush_interval", &self.flush_interval())
            .finish()
    }
}
