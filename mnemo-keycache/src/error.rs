//! Key cache error types.

use mnemo_crypto::CryptoError;
use thiserror::Error;

/// Result type for key cache operations.
pub type KeyCacheResult<T> = Result<T, KeyCacheError>;

#[derive(Debug, Error)]
pub enum KeyCacheError {
    /// Wrong passphrase or tampered envelope — recoverable by
    /// re-authenticating. Never carries key material.
    #[error("authentication failed")]
    AuthFailure,

    /// Key material TTL elapsed or the entry was evicted; the caller should
    /// prompt for a fresh unlock. Distinct from `AuthFailure` so clients can
    /// say "session timed out" rather than "wrong passphrase".
    #[error("key material expired")]
    SessionExpired,

    /// Malformed salt or unsupported KDF parameters — fatal configuration
    /// error, never retried automatically.
    #[error("configuration error: {0}")]
    Config(String),

    /// A derivation worker failed to run to completion.
    #[error("internal task failure: {0}")]
    Internal(String),
}

impl From<CryptoError> for KeyCacheError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthFailure => KeyCacheError::AuthFailure,
            other => KeyCacheError::Config(other.to_string()),
        }
    }
}
