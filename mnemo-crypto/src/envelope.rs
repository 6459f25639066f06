//! DEK generation and wrapping.
//!
//! A tenant's DEK is random, wrapped under the passphrase-derived KEK, and
//! persisted only in wrapped form. Wrapping reuses the same AEAD primitive
//! as content fields, with the tenant id as the binding.

use crate::cipher::{dek_aad, open, seal, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{SymmetricKey, KEY_SIZE};
use mnemo_types::TenantId;
use zeroize::Zeroize;

/// Generates a fresh random DEK for a new tenant.
pub fn generate_dek() -> SymmetricKey {
    SymmetricKey::generate()
}

/// Wraps a DEK under a KEK, bound to the owning tenant.
pub fn wrap_dek(
    kek: &SymmetricKey,
    dek: &SymmetricKey,
    tenant_id: &TenantId,
) -> CryptoResult<Envelope> {
    seal(kek, dek.as_bytes(), &dek_aad(tenant_id))
}

/// Unwraps a tenant's DEK with the given KEK.
///
/// A wrong KEK, a tampered envelope, or an envelope lifted from another
/// tenant all surface as [`CryptoError::AuthFailure`].
pub fn unwrap_dek(
    kek: &SymmetricKey,
    wrapped: &Envelope,
    tenant_id: &TenantId,
) -> CryptoResult<SymmetricKey> {
    let mut plaintext = open(kek, wrapped, &dek_aad(tenant_id))?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        });
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    let dek = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    plaintext.zeroize();
    Ok(dek)
}
