//! Merging locally accumulated deltas into the remote store.
//!
//! A flush cycle works one counter at a time:
//!
//! 1. Under the table lock, snapshot every dirty counter as a [`PendingFlush`].
//! 2. Without the lock, read the remote record of the counter.
//! 3. If a record exists, write `baseline + delta` conditionally on the record
//!    still holding `baseline`. Otherwise write the in-memory total
//!    unconditionally (racing creators may overwrite each other).
//! 4. On success, re-take the lock and subtract the snapshotted delta.
//!
//! A conditional-check failure is a [`FlushOutcome::Conflict`]: another writer
//! updated the record after our read. Any other error, including a malformed
//! remote value or an elapsed request timeout, is a [`FlushOutcome::Failed`].
//! In both cases the counter keeps its delta and is retried on the next cycle.
//! One counter's failure never stops the others from being flushed.
//!
//! Cycles are serialized: a scheduled tick and a manual flush never run at the
//! same time.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tracing::{debug, info, warn};

use crate::counters::{lock, PendingFlush, SharedTable};
use crate::encoding::{decode_value, encode_value};
use crate::error::{Error, Result, StoreError};
use crate::store::{AttributeStore, PutCondition};

/// Result of flushing a single counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The delta was merged into the remote record.
    Flushed,
    /// The remote record changed since it was read.
    Conflict,
    /// The store call failed or the remote value was unusable.
    Failed,
}

/// Summary of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlushReport {
    /// Counters whose snapshotted delta reached the store.
    pub flushed: usize,
    /// Counters that hit a conditional-update conflict.
    pub conflicts: usize,
    /// Counters whose flush failed for any other reason.
    pub failures: usize,
    /// Counters still carrying a non-zero delta after the cycle.
    pub still_unflushed: usize,
}

/// Lifetime flush statistics.
///
/// Each total sits on its own cache line; the scheduler task updates them while
/// request threads read them.
#[derive(Debug, Default)]
pub struct FlushStats {
    cycles: CachePadded<AtomicU64>,
    flushed: CachePadded<AtomicU64>,
    conflicts: CachePadded<AtomicU64>,
    failures: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`FlushStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlushStatsSnapshot {
    pub cycles: u64,
    pub flushed: u64,
    pub conflicts: u64,
    pub failures: u64,
}

impl FlushStats {
    fn record(&self, report: &FlushReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.flushed
            .fetch_add(report.flushed as u64, Ordering::Relaxed);
        self.conflicts
            .fetch_add(report.conflicts as u64, Ordering::Relaxed);
        self.failures
            .fetch_add(report.failures as u64, Ordering::Relaxed);
    }

    /// Returns the current totals.
    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Performs flush cycles of a counter table against an [`AttributeStore`].
pub struct Reconciler<S> {
    store: Arc<S>,
    table_name: String,
    counters: SharedTable,
    request_timeout: Duration,
    gate: tokio::sync::Mutex<()>,
    stats: FlushStats,
}

impl<S: AttributeStore> Reconciler<S> {
    pub(crate) fn new(
        store: Arc<S>,
        table_name: impl Into<String>,
        counters: SharedTable,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            table_name: table_name.into(),
            counters,
            request_timeout,
            gate: tokio::sync::Mutex::new(()),
            stats: FlushStats::default(),
        }
    }

    /// Name of the remote table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Lifetime statistics of this reconciler.
    pub fn stats(&self) -> FlushStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs one flush cycle over every dirty counter.
    ///
    /// Waits for any cycle already in progress to finish first.
    pub async fn flush_cycle(&self) -> FlushReport {
        let _cycle = self.gate.lock().await;

        let pending = lock(&self.counters).dirty();
        let mut report = FlushReport::default();

        for counter in &pending {
            match self.flush_one(counter).await {
                FlushOutcome::Flushed => report.flushed += 1,
                FlushOutcome::Conflict => report.conflicts += 1,
                FlushOutcome::Failed => report.failures += 1,
            }
        }

        report.still_unflushed = lock(&self.counters).unflushed_count();
        self.stats.record(&report);

        if pending.is_empty() {
            debug!(table = %self.table_name, "flush cycle: nothing to flush");
        } else {
            info!(
                table = %self.table_name,
                flushed = report.flushed,
                conflicts = report.conflicts,
                failures = report.failures,
                still_unflushed = report.still_unflushed,
                "flush cycle complete"
            );
        }
        report
    }

    /// Flushes a single snapshotted counter and settles it on success.
    pub(crate) async fn flush_one(&self, pending: &PendingFlush) -> FlushOutcome {
        match self.write_back(pending).await {
            Ok(value) => {
                if !lock(&self.counters).settle(pending) {
                    debug!(counter = %pending.name, "counter cleared during flush, settle discarded");
                }
                debug!(
                    counter = %pending.name,
                    delta = pending.delta,
                    value,
                    "flushed counter"
                );
                FlushOutcome::Flushed
            }
            Err(Error::Store(err)) if err.is_conflict() => {
                debug!(counter = %pending.name, "conditional update conflict, retrying next cycle");
                FlushOutcome::Conflict
            }
            Err(err) => {
                warn!(counter = %pending.name, error = %err, "flush failed, retrying next cycle");
                FlushOutcome::Failed
            }
        }
    }

    /// Read-merge-write of one counter. Returns the value written.
    async fn write_back(&self, pending: &PendingFlush) -> Result<i64> {
        let current = self
            .bounded(self.store.get_attribute(&self.table_name, &pending.name))
            .await?;

        let (value, condition) = match current {
            Some(encoded) => {
                let baseline = decode_value(&encoded).map_err(|source| Error::Encoding {
                    key: pending.name.clone(),
                    source,
                })?;
                debug!(counter = %pending.name, baseline, "read remote baseline");
                (
                    baseline.wrapping_add(pending.delta),
                    Some(PutCondition::expect(encoded)),
                )
            }
            None => (pending.total, None),
        };

        self.bounded(self.store.put_attribute(
            &self.table_name,
            &pending.name,
            &encode_value(value),
            condition,
        ))
        .await?;
        Ok(value)
    }

    /// Lists every counter in the remote table with its decoded value.
    pub async fn global_counters(&self) -> Result<Vec<(String, i64)>> {
        let attrs = self.bounded(self.store.select_all(&self.table_name)).await?;
        attrs
            .into_iter()
            .map(|(key, encoded)| match decode_value(&encoded) {
                Ok(value) => Ok((key, value)),
                Err(source) => Err(Error::Encoding { key, source }),
            })
            .collect()
    }

    /// Applies the request timeout to a store call.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.request_timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CounterTable;
    use crate::store::{FaultKind, MemoryStore};
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    const TABLE: &str = "laps";

    async fn setup() -> (Arc<MemoryStore>, SharedTable, Reconciler<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.create_table(TABLE).await.unwrap();
        let counters: SharedTable = Arc::new(Mutex::new(CounterTable::new()));
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            TABLE,
            Arc::clone(&counters),
            Duration::from_secs(1),
        );
        (store, counters, reconciler)
    }

    fn remote(store: &MemoryStore, key: &str) -> Option<i64> {
        store
            .value(TABLE, key)
            .map(|v| decode_value(&v).unwrap())
    }

    #[tokio::test]
    async fn test_flush_creates_missing_record() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 3);

        let report = reconciler.flush_cycle().await;

        assert_eq!(report.flushed, 1);
        assert_eq!(report.still_unflushed, 0);
        assert_eq!(remote(&store, "car-7"), Some(3));
        let entry = lock(&counters).get("car-7").unwrap();
        assert_eq!(entry.total, 3);
        assert_eq!(entry.unflushed, 0);
    }

    #[tokio::test]
    async fn test_flush_merges_into_existing_record() {
        let (store, counters, reconciler) = setup().await;
        store.insert_raw(TABLE, "car-7", encode_value(40));
        lock(&counters).apply("car-7", 2);

        let report = reconciler.flush_cycle().await;

        assert_eq!(report.flushed, 1);
        assert_eq!(remote(&store, "car-7"), Some(42));
        assert_eq!(lock(&counters).get("car-7").unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_flush_negative_delta() {
        let (store, counters, reconciler) = setup().await;
        store.insert_raw(TABLE, "car-7", encode_value(10));
        lock(&counters).apply("car-7", -4);

        reconciler.flush_cycle().await;

        assert_eq!(remote(&store, "car-7"), Some(6));
    }

    #[tokio::test]
    async fn test_clean_counters_are_skipped() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 1);
        lock(&counters).apply("car-7", -1);

        let report = reconciler.flush_cycle().await;

        assert_eq!(report, FlushReport::default());
        assert_eq!(store.calls().gets, 0);
        assert_eq!(store.calls().puts, 0);
    }

    #[tokio::test]
    async fn test_increment_during_flush_is_not_lost() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 5);

        let fired = Arc::new(AtomicBool::new(false));
        {
            let counters = Arc::clone(&counters);
            let fired = Arc::clone(&fired);
            store.on_read(move |_, key| {
                if !fired.swap(true, Ordering::SeqCst) {
                    lock(&counters).apply(key, 2);
                }
            });
        }

        let report = reconciler.flush_cycle().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.still_unflushed, 1);
        assert_eq!(remote(&store, "car-7"), Some(5));
        let entry = lock(&counters).get("car-7").unwrap();
        assert_eq!(entry.total, 7);
        assert_eq!(entry.unflushed, 2);

        let report = reconciler.flush_cycle().await;
        assert_eq!(report.still_unflushed, 0);
        assert_eq!(remote(&store, "car-7"), Some(7));
    }

    #[tokio::test]
    async fn test_conflict_leaves_local_state_untouched() {
        let (store, counters, reconciler) = setup().await;
        store.insert_raw(TABLE, "car-7", encode_value(10));
        lock(&counters).apply("car-7", 3);

        // another process writes its own delta between our read and our write
        let fired = Arc::new(AtomicBool::new(false));
        {
            let store_ref = Arc::downgrade(&store);
            let fired = Arc::clone(&fired);
            store.on_read(move |table, key| {
                if !fired.swap(true, Ordering::SeqCst) {
                    if let Some(store) = store_ref.upgrade() {
                        store.insert_raw(table, key, encode_value(11));
                    }
                }
            });
        }

        let report = reconciler.flush_cycle().await;
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.still_unflushed, 1);
        assert_eq!(
            lock(&counters).get("car-7"),
            Some(crate::counters::CounterEntry {
                total: 3,
                unflushed: 3
            })
        );
        assert_eq!(remote(&store, "car-7"), Some(11));

        let report = reconciler.flush_cycle().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(remote(&store, "car-7"), Some(14));
        assert_eq!(lock(&counters).get("car-7").unwrap().unflushed, 0);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_counter() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 1);
        lock(&counters).apply("car-8", 1);
        store.fail_key("car-7", 1, FaultKind::Unavailable);

        let report = reconciler.flush_cycle().await;

        assert_eq!(report.flushed, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.still_unflushed, 1);
        assert_eq!(remote(&store, "car-8"), Some(1));
        assert_eq!(remote(&store, "car-7"), None);
        assert_eq!(lock(&counters).get("car-7").unwrap().unflushed, 1);

        let report = reconciler.flush_cycle().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(remote(&store, "car-7"), Some(1));
    }

    #[tokio::test]
    async fn test_malformed_remote_value_is_a_failure() {
        let (store, counters, reconciler) = setup().await;
        store.insert_raw(TABLE, "car-7", "garbage");
        lock(&counters).apply("car-7", 1);
        lock(&counters).apply("car-8", 1);

        let report = reconciler.flush_cycle().await;

        assert_eq!(report.failures, 1);
        assert_eq!(report.flushed, 1);
        assert_eq!(store.value(TABLE, "car-7").as_deref(), Some("garbage"));
        assert_eq!(lock(&counters).get("car-7").unwrap().unflushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 1);
        store.set_latency(Duration::from_secs(5));

        let report = reconciler.flush_cycle().await;

        assert_eq!(report.failures, 1);
        assert_eq!(report.flushed, 0);
        assert_eq!(lock(&counters).get("car-7").unwrap().unflushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycles_do_not_double_apply() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 4);
        store.set_latency(Duration::from_millis(100));

        let (a, b) = tokio::join!(reconciler.flush_cycle(), reconciler.flush_cycle());

        assert_eq!(a.flushed + b.flushed, 1);
        assert_eq!(store.calls().puts, 1);
        assert_eq!(remote(&store, "car-7"), Some(4));
    }

    #[tokio::test]
    async fn test_clear_during_flush_does_not_corrupt() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 5);
        {
            let counters = Arc::clone(&counters);
            store.on_read(move |_, key| {
                let mut table = lock(&counters);
                if table.get(key).map(|e| e.total) == Some(5) {
                    table.clear();
                    table.apply(key, 1);
                }
            });
        }

        reconciler.flush_cycle().await;

        let entry = lock(&counters).get("car-7").unwrap();
        assert_eq!(entry.total, 1);
        assert_eq!(entry.unflushed, 1);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_discarded_settle_is_logged() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("car-7", 5);
        {
            let counters = Arc::clone(&counters);
            store.on_read(move |_, _| lock(&counters).clear());
        }

        let report = reconciler.flush_cycle().await;

        assert_eq!(report.flushed, 1);
        assert!(lock(&counters).is_empty());
        assert!(logs.contents().contains("settle discarded"));
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, counters, reconciler) = setup().await;
        lock(&counters).apply("a", 1);
        lock(&counters).apply("b", 1);
        store.fail_key("b", 1, FaultKind::Throttled);

        reconciler.flush_cycle().await;
        reconciler.flush_cycle().await;

        assert_eq!(
            reconciler.stats(),
            FlushStatsSnapshot {
                cycles: 2,
                flushed: 2,
                conflicts: 0,
                failures: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_global_counters() {
        let (store, _counters, reconciler) = setup().await;
        store.insert_raw(TABLE, "car-7", encode_value(7));
        store.insert_raw(TABLE, "car-8", encode_value(-8));

        let all = reconciler.global_counters().await.unwrap();
        assert_eq!(
            all,
            vec![("car-7".to_string(), 7), ("car-8".to_string(), -8)]
        );

        store.insert_raw(TABLE, "car-9", "bogus");
        assert!(matches!(
            reconciler.global_counters().await,
            Err(Error::Encoding { key, .. }) if key == "car-9"
        ));
    }
}
