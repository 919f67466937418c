//! Periodic flush scheduling.
//!
//! [`FlushScheduler`] owns one tokio task that ticks at a fixed interval and
//! runs a flush cycle on each tick:
//!
//! ```text
//!   ┌──────────── loop ─────────────┐
//!   │  select! {                    │
//!   │    cancelled  => break        │
//!   │    tick       => flush_cycle  │──► Reconciler (serialized by its gate)
//!   │  }                            │
//!   └───────────────────────────────┘
//! ```
//!
//! The cancellation token is only observed between cycles, so cancelling the
//! scheduler never interrupts a cycle that has already started. Cancellation
//! is polled before the ticker: a tick that came due during a cancelled cycle
//! never starts another one. Ticks missed
//! while a slow cycle runs are skipped rather than bunched up.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::reconciler::Reconciler;
use crate::store::AttributeStore;

/// A running periodic flush task.
#[derive(Debug)]
pub struct FlushScheduler {
    interval: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FlushScheduler {
    /// Spawns the flush task on the current tokio runtime.
    ///
    /// The first cycle runs one full `interval` after start.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, or if `interval` is zero.
    pub fn start<S>(reconciler: Arc<Reconciler<S>>, interval: Duration) -> Self
    where
        S: AttributeStore + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let report = reconciler.flush_cycle().await;
                if report.still_unflushed > 0 {
                    debug!(
                        still_unflushed = report.still_unflushed,
                        "scheduled flush left counters pending"
                    );
                }
            }
            debug!(table = %reconciler.table_name(), "flush scheduler stopped");
        });

        debug!(?interval, "flush scheduler started");
        Self {
            interval,
            cancel,
            task,
        }
    }

    /// The period between cycles.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops future ticks without waiting for the task.
    ///
    /// A cycle already in progress runs to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stops future ticks and waits for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "flush scheduler task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{lock, CounterTable, SharedTable};
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    async fn setup() -> (Arc<MemoryStore>, SharedTable, Arc<Reconciler<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        store.create_table("laps").await.unwrap();
        let counters: SharedTable = Arc::new(Mutex::new(CounterTable::new()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            "laps",
            Arc::clone(&counters),
            Duration::from_secs(1),
        ));
        (store, counters, reconciler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_flush() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 1);

        let scheduler = FlushScheduler::start(Arc::clone(&reconciler), Duration::from_secs(10));
        assert_eq!(scheduler.interval(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reconciler.stats().cycles, 0);
        assert!(store.value("laps", "car-7").is_none());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(reconciler.stats().cycles, 1);
        assert!(store.value("laps", "car-7").is_some());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(reconciler.stats().cycles, 3);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_ticks() {
        let (_store, _counters, reconciler) = setup().await;
        let scheduler = FlushScheduler::start(Arc::clone(&reconciler), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.stop().await;
        let cycles = reconciler.stats().cycles;
        assert_eq!(cycles, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(reconciler.stats().cycles, cycles);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_lets_in_flight_cycle_finish() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 2);
        store.set_latency(Duration::from_millis(400));

        let scheduler = FlushScheduler::start(Arc::clone(&reconciler), Duration::from_secs(1));

        // the first cycle starts at 1s and needs two store calls of 400ms each
        tokio::time::sleep(Duration::from_millis(1200)).await;
        scheduler.cancel();
        assert!(!scheduler.is_finished());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_finished());
        assert_eq!(reconciler.stats().flushed, 1);
        assert_eq!(lock(&counters).get("car-7").unwrap().unflushed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_slow_cycle_skips_pending_tick() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 1);
        // get + put take 1.2s, so the tick at 2s is already due when the first cycle ends
        store.set_latency(Duration::from_millis(600));

        let scheduler = FlushScheduler::start(Arc::clone(&reconciler), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        lock(&counters).apply("car-7", 1);
        scheduler.cancel();
        scheduler.stop().await;

        assert_eq!(reconciler.stats().cycles, 1);
        assert_eq!(lock(&counters).get("car-7").unwrap().unflushed, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(reconciler.stats().cycles, 1);
    }
}
