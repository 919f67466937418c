//! Error types shared by the accumulator, the reconciler and store clients.
//!
//! Three layers of errors exist:
//!
//! - [`StoreError`] - returned by [`AttributeStore`](crate::store::AttributeStore)
//!   implementations. [`StoreError::ConditionalCheckFailed`] is the distinguishable
//!   conflict outcome of a conditional put.
//! - [`EncodingError`] - a stored value does not follow the fixed-width format.
//! - [`Error`] - the crate level error surfaced by fallible public operations.
//!
//! Per-counter flush failures are never surfaced to `increment`/`decrement`
//! callers. They are logged, counted and retried on the next cycle.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by a remote attribute store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The precondition of a conditional put did not hold at write time.
    #[error("conditional check failed for `{key}`")]
    ConditionalCheckFailed {
        /// The attribute key that was being written.
        key: String,
    },

    /// The table does not exist.
    #[error("no such table `{0}`")]
    NoSuchTable(String),

    /// The request did not complete within the allotted time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The store rejected the request because of throttling.
    #[error("request throttled: {0}")]
    Throttled(String),

    /// The store could not be reached or failed transiently.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns `true` if this is a conditional-update conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConditionalCheckFailed { .. })
    }
}

/// Errors decoding a fixed-width counter value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// The value does not have the expected number of digits.
    #[error("expected {expected} digits, found {found}")]
    Length {
        /// Required width.
        expected: usize,
        /// Width of the rejected value.
        found: usize,
    },

    /// The value contains characters other than ASCII digits.
    #[error("not a decimal value: `{0}`")]
    NotDecimal(String),

    /// The value does not fit in 64 bits.
    #[error("value out of range: `{0}`")]
    Overflow(String),
}

/// Crate level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The backing table could not be created at startup.
    #[error("failed to create table `{table}`: {source}")]
    TableCreation {
        /// Name of the table.
        table: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored value could not be decoded.
    #[error("malformed value for `{key}`: {source}")]
    Encoding {
        /// The attribute key holding the value.
        key: String,
        /// Underlying decoding error.
        #[source]
        source: EncodingError,
    },

    /// The configuration is not usable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration could not be parsed.
    #[cfg(feature = "json")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for accumulator operations.
pub type Result<T> = std::result::Result<T, Error>;
