//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant already exists: {0}")]
    TenantExists(String),

    #[error("field not found: {entity_id}/{field_name}")]
    FieldNotFound {
        entity_id: String,
        field_name: String,
    },

    /// A persisted value has an impossible shape (wrong nonce/tag/salt
    /// length). Indicates corruption or external modification.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}
