//! JSON observer for serializing counters.
//!
//! This module provides [`JsonObserver`], which serializes accumulator
//! snapshots and remote counter listings to JSON using serde.
//!
//! # Feature Flag
//!
//! This module requires the `json` feature:
//!
//! ```toml
//! [dependencies]
//! accumulatori = { version = "0.1", features = ["json"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use accumulatori::accumulator::CounterSnapshot;
//! use accumulatori::observers::json::JsonObserver;
//!
//! let snapshot = vec![CounterSnapshot { name: "car-7".into(), total: 3, unflushed: 1 }];
//! let json = JsonObserver::new().to_json(&snapshot).unwrap();
//! assert_eq!(json, r#"[{"name":"car-7","total":3,"unflushed":1}]"#);
//! ```

use serde::{Deserialize, Serialize};

use crate::accumulator::CounterSnapshot;
use crate::reconciler::FlushStatsSnapshot;

/// A point-in-time capture of an accumulator, optionally timestamped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Optional timestamp in milliseconds since Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    /// Flush statistics, if included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush: Option<FlushStatsSnapshot>,
    /// The counter snapshots.
    pub counters: Vec<CounterSnapshot>,
}

impl MetricsSnapshot {
    /// Creates a new metrics snapshot with the given counters.
    pub fn new(counters: Vec<CounterSnapshot>) -> Self {
        Self {
            timestamp_ms: None,
            flush: None,
            counters,
        }
    }

    /// Finds a counter by name.
    pub fn get(&self, name: &str) -> Option<&CounterSnapshot> {
        self.counters.iter().find(|c| c.name == name)
    }
}

/// A counter as read from the remote table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteCounter {
    /// Attribute key.
    pub name: String,
    /// Decoded value.
    pub value: i64,
}

/// Configuration for the JSON observer.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    /// Whether to pretty-print the JSON output.
    pub pretty: bool,
    /// Whether to include a timestamp in the output.
    pub include_timestamp: bool,
    /// Whether to wrap counters in a [`MetricsSnapshot`] object.
    pub wrap_in_snapshot: bool,
}

/// An observer that serializes counters to JSON format.
///
/// With timestamp wrapper:
///
/// ```rust,ignore
/// use accumulatori::observers::json::JsonObserver;
///
/// let observer = JsonObserver::new()
///     .wrap_in_snapshot(true)
///     .include_timestamp(true);
/// let body = observer.to_json_with_stats(&counters.snapshot(), counters.stats())?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonObserver {
    config: JsonConfig,
}

impl JsonObserver {
    /// Creates a new JSON observer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new JSON observer with the specified configuration.
    pub fn with_config(config: JsonConfig) -> Self {
        Self { config }
    }

    /// Enables or disables pretty-printing.
    pub fn pretty(mut self, enabled: bool) -> Self {
        self.config.pretty = enabled;
        self
    }

    /// Enables or disables timestamp inclusion.
    ///
    /// Only has effect when `wrap_in_snapshot` is also enabled.
    pub fn include_timestamp(mut self, enabled: bool) -> Self {
        self.config.include_timestamp = enabled;
        self
    }

    /// Enables or disables wrapping the output in a [`MetricsSnapshot`].
    pub fn wrap_in_snapshot(mut self, enabled: bool) -> Self {
        self.config.wrap_in_snapshot = enabled;
        self
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<String, serde_json::Error> {
        if self.config.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
    }

    fn wrap(
        &self,
        counters: &[CounterSnapshot],
        flush: Option<FlushStatsSnapshot>,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp_ms: self.config.include_timestamp.then(current_timestamp_ms),
            flush,
            counters: counters.to_vec(),
        }
    }

    /// Serializes in-memory counters to a JSON string.
    pub fn to_json(&self, counters: &[CounterSnapshot]) -> Result<String, serde_json::Error> {
        if self.config.wrap_in_snapshot {
            self.serialize(&self.wrap(counters, None))
        } else {
            self.serialize(&counters)
        }
    }

    /// Serializes in-memory counters together with flush statistics.
    ///
    /// The output is always wrapped in a [`MetricsSnapshot`].
    pub fn to_json_with_stats(
        &self,
        counters: &[CounterSnapshot],
        stats: FlushStatsSnapshot,
    ) -> Result<String, serde_json::Error> {
        self.serialize(&self.wrap(counters, Some(stats)))
    }

    /// Serializes the remote table listing to a JSON array.
    pub fn global_to_json(&self, counters: &[(String, i64)]) -> Result<String, serde_json::Error> {
        let remote: Vec<RemoteCounter> = counters
            .iter()
            .map(|(name, value)| RemoteCounter {
                name: name.clone(),
                value: *value,
            })
            .collect();
        self.serialize(&remote)
    }
}

/// Returns the current time in milliseconds since Unix epoch.
fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
