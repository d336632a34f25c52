//! Error taxonomy for the broker's public operations.
//!
//! Recoverable conditions are ordinary [`thiserror`] enums, one per
//! operation family, matching `pageserver::tenant::mgr`'s `GetTenantError` /
//! `TenantStateError` style. Conditions that indicate implementation bugs
//! (fatal state corruption) are not represented here at all: they `panic!`
//! at the call site instead.

use crate::id::TenantId;

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("tenant id must not be empty")]
    InvalidTenantId,

    /// A joined error: callers can match on either variant through
    /// `is_too_many_requests`, but the `Display` surfaces both the internal
    /// cause and the user-facing condition.
    #[error("tenant {tenant} queue is at capacity ({max}); too many requests")]
    MaxQueueLengthExceeded { tenant: TenantId, max: usize },
}

impl EnqueueError {
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, EnqueueError::MaxQueueLengthExceeded { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DequeueError {
    /// The worker is unknown to the registry, or has announced shutdown.
    /// Callers should retry with the same `last_tenant_index` they passed in.
    #[error("worker is unknown or shutting down")]
    WorkerShuttingDown,
}
