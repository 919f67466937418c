//! Observers for rendering accumulator state.
//!
//! Observers turn a list of [`CounterSnapshot`](crate::accumulator::CounterSnapshot)s,
//! as returned by [`Accumulator::snapshot`](crate::accumulator::Accumulator::snapshot),
//! into something a management or debug endpoint can serve:
//!
//! - [`table`] - Pretty-print counters as tables using the `tabled` crate
//! - [`json`] - Serialize counters to JSON format
//!
//! # Feature Flags
//!
//! - `table` - Enables the [`table`] module
//! - `json` - Enables the [`json`] module
//! - `full` - Enables all observer modules
//!
//! # Example
//!
//! ```rust,ignore
//! use accumulatori::observers::json::JsonObserver;
//! use accumulatori::observers::table::TableObserver;
//!
//! let snapshot = counters.snapshot();
//! println!("{}", TableObserver::new().render(&snapshot));
//! let body = JsonObserver::new().pretty(true).to_json(&snapshot)?;
//! ```

mod error;

pub use error::{ObserverError, Result};

#[cfg(feature = "table")]
pub mod table;

#[cfg(feature = "json")]
pub mod json;
