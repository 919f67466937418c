//! Accumulator configuration.
//!
//! [`AccumulatorConfig`] follows the builder style used across the crate:
//!
//! ```rust
//! use std::time::Duration;
//! use accumulatori::config::AccumulatorConfig;
//!
//! let config = AccumulatorConfig::new("p1lapchart")
//!     .with_flush_interval(Duration::from_secs(30))
//!     .with_request_timeout(Duration::from_secs(2));
//! assert!(config.validate().is_ok());
//! ```
//!
//! With the `json` feature the same settings can be loaded from JSON, where
//! durations are expressed in milliseconds:
//!
//! ```rust,ignore
//! let config = AccumulatorConfig::from_json(r#"{"table": "laps", "flush_interval_ms": 10000}"#)?;
//! ```

use std::time::Duration;

use crate::error::{Error, Result};

/// Default period between scheduled flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Default bound on a single store request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for an [`Accumulator`](crate::accumulator::Accumulator).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AccumulatorConfig {
    /// Name of the remote table holding the counters.
    pub table: String,
    /// Period between scheduled flushes. Zero disables the scheduler.
    #[cfg_attr(feature = "serde", serde(rename = "flush_interval_ms", with = "millis"))]
    pub flush_interval: Duration,
    /// Upper bound on each store request issued during a flush.
    #[cfg_attr(feature = "serde", serde(rename = "request_timeout_ms", with = "millis"))]
    pub request_timeout: Duration,
    /// Whether [`shutdown`](crate::accumulator::Accumulator::shutdown) runs a
    /// final flush.
    pub flush_on_shutdown: bool,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            table: "counters".to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            flush_on_shutdown: true,
        }
    }
}

impl AccumulatorConfig {
    /// Creates a configuration for `table` with default timings.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Sets the period between scheduled flushes.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the bound on each store request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables the final flush on shutdown.
    pub fn with_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }

    /// Checks that the configuration can be used.
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(Error::Config("table name must not be empty".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".into()));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
