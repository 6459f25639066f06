//! Zero-knowledge key hierarchy primitives for mnemo.
//!
//! Provides per-tenant envelope encryption using:
//! - Argon2id for KEK derivation from passphrases
//! - XChaCha20-Poly1305 for authenticated encryption with identity binding
//! - Secure key handling with zeroization
//!
//! # Architecture
//!
//! The encryption uses a two-tier key system:
//!
//! 1. **KEK (Key Encryption Key)**: derived from the user's passphrase and
//!    the tenant's stored salt. Never persisted — re-derived per session.
//!
//! 2. **DEK (Data Encryption Key)**: a random per-tenant key. Stored only
//!    wrapped (encrypted) under the KEK; plaintext form exists solely in
//!    process memory.
//!
//! This allows rotating the passphrase without re-encrypting content (only
//! the wrapped DEK changes) and keeps the server unable to reconstruct any
//! plaintext from what is persisted.

mod cipher;
mod envelope;
mod error;
mod key;

pub use cipher::{dek_aad, field_aad, open, seal, Envelope, NONCE_SIZE, TAG_SIZE};
pub use envelope::{generate_dek, unwrap_dek, wrap_dek};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, KdfParams, Salt, SymmetricKey, KDF_VERSION, KEY_SIZE, SALT_SIZE};
