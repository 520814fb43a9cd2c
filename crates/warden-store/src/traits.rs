//! Store trait definitions

use crate::{AuditEvent, StoreResult};

/// Durable destination for audit events
pub trait AuditSink: Send + Sync {
    /// Append an audit event. The event id is already assigned.
    fn append(&self, event: &AuditEvent) -> StoreResult<()>;

    /// Most recent events, newest first
    fn recent(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    /// Highest event id stored so far, 0 for an empty sink
    fn last_seq(&self) -> StoreResult<u64>;

    /// Check if the sink is healthy
    fn is_healthy(&self) -> bool;
}
