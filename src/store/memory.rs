//! In-memory [`AttributeStore`] with fault injection.
//!
//! [`MemoryStore`] honours the full store contract, including compare-and-swap
//! puts, and adds knobs for exercising failure paths:
//!
//! - [`fail_next`](MemoryStore::fail_next) fails the next N calls of any kind
//! - [`fail_key`](MemoryStore::fail_key) fails the next N calls touching one key
//! - [`set_latency`](MemoryStore::set_latency) delays every call
//! - [`on_read`](MemoryStore::on_read) runs a hook after every successful read
//! - [`insert_raw`](MemoryStore::insert_raw) writes out of band, as another
//!   process sharing the table would
//!
//! # Examples
//!
//! ```rust
//! use accumulatori::store::{AttributeStore, MemoryStore, PutCondition};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryStore::new();
//! store.create_table("laps").await.unwrap();
//! store.put_attribute("laps", "car-7", "1", None).await.unwrap();
//!
//! let stale = store
//!     .put_attribute("laps", "car-7", "3", Some(PutCondition::expect("2")))
//!     .await;
//! assert!(stale.unwrap_err().is_conflict());
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{AttributeStore, PutCondition};
use crate::error::StoreError;

/// Kind of failure injected by [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The store cannot be reached.
    Unavailable,
    /// The store throttles the request.
    Throttled,
    /// The request times out.
    Timeout,
}

impl FaultKind {
    fn into_error(self) -> StoreError {
        match self {
            FaultKind::Unavailable => StoreError::Unavailable("injected fault".into()),
            FaultKind::Throttled => StoreError::Throttled("injected fault".into()),
            FaultKind::Timeout => StoreError::Timeout(Duration::ZERO),
        }
    }
}

/// Number of calls served, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub creates: u64,
    pub gets: u64,
    pub puts: u64,
    pub selects: u64,
}

type ReadHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct State {
    tables: HashMap<String, BTreeMap<String, String>>,
    faults: VecDeque<FaultKind>,
    key_faults: HashMap<String, VecDeque<FaultKind>>,
    latency: Duration,
    calls: CallCounts,
    read_hook: Option<ReadHook>,
}

/// A complete in-process attribute store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next `count` calls, of any operation, with `kind`.
    pub fn fail_next(&self, count: usize, kind: FaultKind) {
        self.lock().faults.extend(std::iter::repeat(kind).take(count));
    }

    /// Fails the next `count` calls touching `key` with `kind`.
    pub fn fail_key(&self, key: impl Into<String>, count: usize, kind: FaultKind) {
        self.lock()
            .key_faults
            .entry(key.into())
            .or_default()
            .extend(std::iter::repeat(kind).take(count));
    }

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Installs a hook invoked with `(table, key)` after every successful read.
    ///
    /// The hook runs without the store lock held, so it may write to the
    /// store through [`insert_raw`](Self::insert_raw).
    pub fn on_read<F>(&self, hook: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.lock().read_hook = Some(Arc::new(hook));
    }

    /// Writes `value` under `key` bypassing faults, latency and conditions.
    ///
    /// Creates the table if needed.
    pub fn insert_raw(&self, table: &str, key: &str, value: impl Into<String>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Returns the raw value stored under `key`, if any.
    pub fn value(&self, table: &str, key: &str) -> Option<String> {
        self.lock()
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .cloned()
    }

    /// Returns `true` if `table` exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// Returns how many calls of each kind have been served.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Applies latency, then pops a pending fault for `key` (if any).
    async fn admit(&self, key: Option<&str>) -> Result<(), StoreError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(kind) = state.faults.pop_front() {
            return Err(kind.into_error());
        }
        if let Some(key) = key {
            if let Some(kind) = state.key_faults.get_mut(key).and_then(VecDeque::pop_front) {
                return Err(kind.into_error());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AttributeStore for MemoryStore {
    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.admit(None).await?;
        let mut state = self.lock();
        state.calls.creates += 1;
        state.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn get_attribute(&self, table: &str, key: &str) -> Result<Option<String>, StoreError> {
        self.admit(Some(key)).await?;
        let (value, hook) = {
            let mut state = self.lock();
            state.calls.gets += 1;
            let value = state
                .tables
                .get(table)
                .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?
                .get(key)
                .cloned();
            (value, state.read_hook.clone())
        };
        if let Some(hook) = hook {
            hook(table, key);
        }
        Ok(value)
    }

    async fn put_attribute(
        &self,
        table: &str,
        key: &str,
        value: &str,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError> {
        self.admit(Some(key)).await?;
        let mut state = self.lock();
        state.calls.puts += 1;
        let attrs = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;

        if let Some(cond) = condition {
            let holds = match attrs.get(key) {
                Some(current) => *current == cond.expected_value,
                None => !cond.must_exist,
            };
            if !holds {
                return Err(StoreError::ConditionalCheckFailed {
                    key: key.to_string(),
                });
            }
        }

        attrs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn select_all(&self, table: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.admit(None).await?;
        let mut state = self.lock();
        state.calls.selects += 1;
        let attrs = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        Ok(attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryStore")
            .field("tables", &state.tables)
            .field("pending_faults", &state.faults.len())
            .field("latency", &state.latency)
            .field("calls", &state.calls)
            .finish()
    }
}
