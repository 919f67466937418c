//! Audit sink for served requests.
//!
//! Each audited request produces one human-readable status line and bumps the
//! counter named after the requested id:
//!
//! ```text
//! {'remoteaddr':'10.0.0.1', 'id':'car-7', 'status':'ok'}
//! ```
//!
//! Lines are emitted through `tracing` on the [`AUDIT_TARGET`] target, so the
//! subscriber installed by the application decides where they go.

use std::sync::Arc;

use tracing::{error, info};

use crate::accumulator::Accumulator;
use crate::store::AttributeStore;

/// `tracing` target of every audit event.
pub const AUDIT_TARGET: &str = "accumulatori::audit";

/// Formats the status line of one audited request.
pub fn format_line(remote_addr: &str, id: &str, status: &str) -> String {
    format!(
        "{{'remoteaddr':'{}', 'id':'{}', 'status':'{}'}}",
        remote_addr, id, status
    )
}

/// Records audited requests and counts them per id.
#[derive(Debug)]
pub struct AuditLog<S: AttributeStore + 'static> {
    counters: Arc<Accumulator<S>>,
}

impl<S: AttributeStore + 'static> AuditLog<S> {
    /// Creates an audit sink counting into `counters`.
    pub fn new(counters: Arc<Accumulator<S>>) -> Self {
        Self { counters }
    }

    /// The accumulator audited requests are counted into.
    pub fn counters(&self) -> &Arc<Accumulator<S>> {
        &self.counters
    }

    /// Logs one request and increments the counter for `id`.
    ///
    /// Returns the in-memory count of requests for `id`.
    pub fn audit(&self, remote_addr: &str, id: &str, status: &str) -> i64 {
        info!(
            target: AUDIT_TARGET,
            remote_addr,
            id,
            status,
            "{}",
            format_line(remote_addr, id, status)
        );
        self.counters.incr_counter(id)
    }

    /// Logs a request-level error.
    pub fn error(&self, msg: &str, detail: &dyn std::fmt::Display) {
        error!(target: AUDIT_TARGET, detail = %detail, "{}", msg);
    }
}
