//! XChaCha20-Poly1305 sealing with identity binding.
//!
//! Nonces are 192 bits and drawn fresh from the OS RNG for every seal, so no
//! counter state needs coordinating across processes. The associated-data
//! string ties each ciphertext to the tenant, entity, and field it was
//! produced for: a ciphertext moved to a different context fails
//! authentication even under the correct key.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use mnemo_types::{EntityId, TenantId};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Nonce size in bytes (192 bits).
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

const FIELD_AAD_PREFIX: &str = "mnemo:field:v1";
const DEK_AAD_PREFIX: &str = "mnemo:dek:v1";

/// The atomic `(ciphertext, nonce, tag)` triple.
///
/// Always created and consumed together; storage writes it in a single
/// statement so a partial triple can never be observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl Envelope {
    /// Total serialized length in bytes.
    pub fn len(&self) -> usize {
        self.ciphertext.len() + NONCE_SIZE + TAG_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Encodes as base64 of `nonce || tag || ciphertext` for transport.
    pub fn to_base64(&self) -> String {
        let mut raw = Vec::with_capacity(self.len());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.tag);
        raw.extend_from_slice(&self.ciphertext);
        BASE64.encode(raw)
    }

    /// Decodes the base64 transport form.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "too short: {} bytes",
                raw.len()
            )));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&raw[..NONCE_SIZE]);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&raw[NONCE_SIZE..NONCE_SIZE + TAG_SIZE]);
        Ok(Self {
            ciphertext: raw[NONCE_SIZE + TAG_SIZE..].to_vec(),
            nonce,
            tag,
        })
    }
}

/// Binding for a content field: tenant + entity + field name.
pub fn field_aad(tenant_id: &TenantId, entity_id: &EntityId, field_name: &str) -> Vec<u8> {
    format!("{FIELD_AAD_PREFIX}\0{tenant_id}\0{entity_id}\0{field_name}").into_bytes()
}

/// Binding for a wrapped DEK: tenant only.
pub fn dek_aad(tenant_id: &TenantId) -> Vec<u8> {
    format!("{DEK_AAD_PREFIX}\0{tenant_id}").into_bytes()
}

/// Encrypts `plaintext` under `key`, binding it to `aad`.
pub fn seal(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Envelope> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let mut combined = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encryption("AEAD seal failed".to_string()))?;

    // The aead crate appends the tag; split it off so the triple is explicit.
    let tag_vec = combined.split_off(combined.len() - TAG_SIZE);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_vec);

    Ok(Envelope {
        ciphertext: combined,
        nonce: nonce_bytes,
        tag,
    })
}

/// Decrypts an envelope, verifying both the tag and the binding.
///
/// Fails closed: wrong key, tampered ciphertext/nonce/tag, and mismatched
/// binding all collapse to [`CryptoError::AuthFailure`] with no partial
/// plaintext released.
pub fn open(key: &SymmetricKey, envelope: &Envelope, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut combined = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&envelope.ciphertext);
    combined.extend_from_slice(&envelope.tag);

    cipher
        .decrypt(
            XNonce::from_slice(&envelope.nonce),
            Payload {
                msg: &combined,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthFailure)
}
