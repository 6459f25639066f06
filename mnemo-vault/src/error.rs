//! Vault error types — the taxonomy the API layer maps to responses.

use mnemo_crypto::CryptoError;
use mnemo_keycache::KeyCacheError;
use mnemo_ledger::LedgerError;
use mnemo_storage::StorageError;
use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Wrong passphrase or tampered ciphertext; the two are not
    /// distinguishable. Recoverable: prompt the user again.
    #[error("authentication failed")]
    AuthFailure,

    /// Cached key material expired or was evicted. Recoverable: re-unlock.
    #[error("session expired; unlock required")]
    SessionExpired,

    /// Policy violation at tenant creation or rotation time.
    #[error("passphrase too short (min {min} characters)")]
    PassphraseTooShort { min: usize },

    /// Malformed salts, unsupported KDF versions, and similar. Fatal;
    /// never retried automatically.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("internal task failure: {0}")]
    Internal(String),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthFailure => VaultError::AuthFailure,
            other => VaultError::Config(other.to_string()),
        }
    }
}

impl From<KeyCacheError> for VaultError {
    fn from(err: KeyCacheError) -> Self {
        match err {
            KeyCacheError::AuthFailure => VaultError::AuthFailure,
            KeyCacheError::SessionExpired => VaultError::SessionExpired,
            KeyCacheError::Config(msg) => VaultError::Config(msg),
            KeyCacheError::Internal(msg) => VaultError::Internal(msg),
        }
    }
}
