//! The remote attribute store contract consumed by the accumulator.
//!
//! The accumulator never depends on a particular vendor. It only needs four
//! operations on a single logical table of `key -> value` attributes:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`create_table`](AttributeStore::create_table) | Idempotent table creation at startup |
//! | [`get_attribute`](AttributeStore::get_attribute) | Read the remote baseline of a counter |
//! | [`put_attribute`](AttributeStore::put_attribute) | Unconditional or compare-and-swap write |
//! | [`select_all`](AttributeStore::select_all) | Diagnostic listing of the whole table |
//!
//! A conditional put whose precondition does not hold must fail with
//! [`StoreError::ConditionalCheckFailed`], which the reconciler treats as an
//! expected conflict rather than a failure.
//!
//! [`MemoryStore`] is a complete in-process implementation, used by tests and
//! demos in place of a real service.

mod memory;

pub use memory::{CallCounts, FaultKind, MemoryStore};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// Precondition attached to a conditional put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCondition {
    /// The value the attribute must currently hold.
    pub expected_value: String,
    /// Whether the attribute must already exist.
    pub must_exist: bool,
}

impl PutCondition {
    /// A compare-and-swap condition: the attribute must exist and hold `expected`.
    pub fn expect(expected: impl Into<String>) -> Self {
        Self {
            expected_value: expected.into(),
            must_exist: true,
        }
    }
}

/// A remote, possibly eventually consistent, key/attribute store.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Creates `table` if it does not exist. A no-op otherwise.
    async fn create_table(&self, table: &str) -> Result<(), StoreError>;

    /// Reads the value stored under `key`, or `None` if absent.
    async fn get_attribute(&self, table: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` under `key`.
    ///
    /// Without a condition the write is unconditional. With a condition the
    /// write fails with [`StoreError::ConditionalCheckFailed`] unless the
    /// precondition holds at write time.
    async fn put_attribute(
        &self,
        table: &str,
        key: &str,
        value: &str,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError>;

    /// Lists every `(key, value)` pair in `table`.
    async fn select_all(&self, table: &str) -> Result<Vec<(String, String)>, StoreError>;
}

#[async_trait]
impl<T: AttributeStore + ?Sized> AttributeStore for Arc<T> {
    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        (**self).create_table(table).await
    }

    async fn get_attribute(&self, table: &str, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get_attribute(table, key).await
    }

    async fn put_attribute(
        &self,
        table: &str,
        key: &str,
        value: &str,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError> {
        (**self).put_attribute(table, key, value, condition).await
    }

    async fn select_all(&self, table: &str) -> Result<Vec<(String, String)>, StoreError> {
        (**self).select_all(table).await
    }
}
