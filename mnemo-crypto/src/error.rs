//! Error taxonomy for the crypto layer.
//!
//! `AuthFailure` carries no detail: a wrong key, a tampered ciphertext,
//! and a mismatched binding are indistinguishable to callers, and no
//! variant ever embeds key bytes, plaintext, or derivation intermediates.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wrong key or tampered data — the two cases are not distinguishable.
    #[error("authentication failed (wrong key or tampered data)")]
    AuthFailure,

    /// A stored salt has the wrong length. Configuration/corruption error,
    /// surfaced before any derivation is attempted.
    #[error("malformed salt: expected {expected} bytes, got {actual}")]
    MalformedSalt { expected: usize, actual: usize },

    /// KDF cost parameters carry a version this build does not support.
    #[error("unsupported KDF parameter version: {0}")]
    UnsupportedKdfVersion(u8),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A serialized envelope could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}
