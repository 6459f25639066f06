//! Key material and Argon2id derivation.
//!
//! The key hierarchy has two tiers:
//!
//! 1. **KEK**: derived on demand from the user's passphrase and the tenant's
//!    stored salt. Never persisted — re-derived whenever needed.
//! 2. **DEK**: random per-tenant key, stored only wrapped under the KEK.
//!
//! Both tiers are plain 256-bit symmetric keys, so they share one type.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// KDF salt size in bytes (128 bits).
pub const SALT_SIZE: usize = 16;

/// Supported KDF parameter version.
pub const KDF_VERSION: u8 = 1;

/// Per-tenant KDF salt.
///
/// Generated once at tenant creation, immutable, public — but never reused
/// across tenants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a salt from a stored blob, rejecting wrong lengths before any
    /// derivation is attempted.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SALT_SIZE {
            return Err(CryptoError::MalformedSalt {
                expected: SALT_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SALT_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// A 256-bit symmetric key (KEK or DEK).
///
/// Exists only in process memory: zeroized on drop, never serializable,
/// `Debug` output is redacted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generates a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(REDACTED)")
    }
}

/// Argon2id cost parameters, versioned so deployments can migrate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub version: u8,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Production profile. Hundreds of milliseconds per derivation and
    /// memory-hard; run it off the request hot path.
    fn default() -> Self {
        Self {
            version: KDF_VERSION,
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Reduced-cost profile for interactive tooling and tests.
    pub fn light() -> Self {
        Self {
            version: KDF_VERSION,
            memory_kib: 8 * 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Rejects parameter sets this build cannot honor. A version mismatch is
    /// a configuration error, not an authentication signal.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.version != KDF_VERSION {
            return Err(CryptoError::UnsupportedKdfVersion(self.version));
        }
        Ok(())
    }
}

/// Derives a KEK from a passphrase and tenant salt via Argon2id (v19).
///
/// Pure and deterministic: identical inputs always reproduce the same key,
/// which is what lets the KEK exist without ever being stored.
pub fn derive_key(passphrase: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<SymmetricKey> {
    params.validate()?;

    let argon_params = argon2::Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut output = [0u8; KEY_SIZE];
    argon
        .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = SymmetricKey::from_bytes(output);
    output.zeroize();
    Ok(key)
}
