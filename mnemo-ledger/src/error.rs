//! Ledger error types.

use mnemo_types::TenantId;
use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A competing writer linked to the same chain tail. Fatal for the
    /// tenant's ledger: appends stay halted until an operator intervenes.
    #[error("audit chain fork detected for tenant {tenant_id} at seq {seq}")]
    ChainFork { tenant_id: TenantId, seq: u64 },

    /// Appends are frozen after a fork until `clear_fork` is called.
    #[error("appends halted for tenant {0} pending operator review")]
    Halted(TenantId),

    #[error("no event at seq {seq} for tenant {tenant_id}")]
    EventNotFound { tenant_id: TenantId, seq: u64 },

    /// Event payloads must hash deterministically; NaN/Infinity cannot.
    #[error("non-finite number in event payload")]
    NonFiniteNumber,

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}
