//! # Accumulatori - Write-Back Counter Accumulators
//!
//! A Rust library for named integer counters that are mutated in memory and
//! periodically reconciled against a remote, eventually consistent
//! key/attribute store using optimistic (compare-and-swap) updates.
//!
//! ## The Problem
//!
//! Counting events straight into a remote store costs one network round trip per
//! event, and concurrent writers from many processes overwrite each other unless
//! every update is a read-modify-write protected against concurrent changes.
//!
//! ## The Solution: Write-Back Accumulation
//!
//! Callers only ever touch an in-memory table. Each counter tracks its `total`
//! and the `unflushed` delta not yet merged remotely. A background task
//! periodically flushes the deltas:
//!
//! ```text
//!   increment("car-7", 1) ──► ┌─────────────────────────────┐
//!   increment("car-7", 2) ──► │ car-7: total 3, unflushed 3 │
//!   decrement("car-9", 1) ──► │ car-9: total -1, unflushed -1│
//!                             └──────────────┬──────────────┘
//!                                            │ every flush interval
//!                                            ▼
//!                       get(car-7) = 40 ─► put(car-7 = 43 if still 40)
//! ```
//!
//! ### Design Principles
//!
//! 1. **Never block callers on I/O**: increments take one short mutex and return.
//!
//! 2. **No lost updates**: a flush snapshots each delta before the network call
//!    and subtracts exactly that snapshot afterwards, so increments that land
//!    during the round trip are kept for the next cycle.
//!
//! 3. **Conflicts are normal**: when another writer changed the remote value
//!    after our read, the conditional put fails and the counter is simply
//!    retried on the next cycle. Local totals are never touched by a flush.
//!
//! 4. **Failure isolation**: a failed or timed out flush of one counter never
//!    stops the others.
//!
//! ## Quick Start
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
//! let config = AccumulatorConfig::new("p1lapchart")
//!     .with_flush_interval(Duration::from_secs(10));
//! let counters = Accumulator::connect(store, config).await.unwrap();
//!
//! // From any thread, no I/O involved
//! counters.incr_counter("car-7");
//! counters.increment("car-7", 5);
//! assert_eq!(counters.get_counter("car-7"), Some(6));
//!
//! // Flushed every 10 seconds, or on demand
//! let still_pending = counters.flush_now().await;
//! assert_eq!(still_pending, 0);
//!
//! counters.shutdown().await;
//! # });
//! ```
//!
//! ## Remote Stores
//!
//! Any service offering idempotent table creation, single-attribute reads,
//! conditional puts and a full scan can back an accumulator by implementing
//! [`AttributeStore`](store::AttributeStore). Values are stored as fixed-width
//! zero-padded decimals (see [`encoding`]) so lexicographic and numeric order
//! agree.
//!
//! ## Observers
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | `table` | [`observers::table`] | Pretty-print counters as ASCII tables |
//! | `json` | [`observers::json`] | Serialize counters to JSON |
//! | `full` | All observers | Enables all observer modules |

pub mod accumulator;
pub mod audit;
pub mod config;
pub mod counters;
pub mod encoding;
pub mod error;
pub mod observers;
pub mod reconciler;
pub mod scheduler;
pub mod store;

pub use accumulator::{Accumulator, CounterSnapshot};
pub use config::AccumulatorConfig;
pub use error::{Error, Result};
