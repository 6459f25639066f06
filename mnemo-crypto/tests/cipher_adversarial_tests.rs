//! Adversarial tests for the envelope cipher and DEK wrapping.
//!
//! Tests wrong-key decryption, tampering of every component of the
//! (ciphertext, nonce, tag) triple, binding substitution, truncation, and
//! nonce-collision behavior. These validate the guarantees the key cache
//! and vault facade rely on.

use mnemo_crypto::{
    dek_aad, derive_key, field_aad, generate_dek, open, seal, unwrap_dek, wrap_dek, CryptoError,
    Envelope, KdfParams, Salt, SymmetricKey, NONCE_SIZE,
};
use mnemo_types::{EntityId, TenantId};
use std::collections::HashSet;

fn bound_envelope(key: &SymmetricKey, plaintext: &[u8]) -> (Envelope, Vec<u8>) {
    let aad = field_aad(&TenantId::new(), &EntityId::new(), "body");
    (seal(key, plaintext, &aad).unwrap(), aad)
}

// ── Wrong Key ──

#[test]
fn open_with_wrong_key_fails() {
    let key_a = SymmetricKey::generate();
    let key_b = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key_a, b"sensitive fact body that must not leak");

    let err = open(&key_b, &envelope, &aad).unwrap_err();
    assert!(matches!(err, CryptoError::AuthFailure));
}

#[test]
fn auth_failure_reveals_nothing() {
    let key = SymmetricKey::generate();
    let wrong = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key, b"top secret plaintext");

    let err = open(&wrong, &envelope, &aad).unwrap_err();
    let rendered = err.to_string();
    assert!(!rendered.contains("secret"));
    // Wrong key and corrupted data render identically.
    let mut tampered = envelope.clone();
    tampered.ciphertext[0] ^= 0xFF;
    let err2 = open(&key, &tampered, &aad).unwrap_err();
    assert_eq!(rendered, err2.to_string());
}

// ── Triple Tampering ──

#[test]
fn every_ciphertext_byte_tampering_detected() {
    let key = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key, b"position tampering test data");

    for i in 0..envelope.ciphertext.len() {
        let mut tampered = envelope.clone();
        tampered.ciphertext[i] ^= 0xFF;
        assert!(
            open(&key, &tampered, &aad).is_err(),
            "tampering at ciphertext byte {i} should be detected"
        );
    }
}

#[test]
fn nonce_tampering_detected() {
    let key = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key, b"nonce-critical data");

    for i in 0..NONCE_SIZE {
        let mut tampered = envelope.clone();
        tampered.nonce[i] ^= 0x01;
        assert!(
            open(&key, &tampered, &aad).is_err(),
            "tampering at nonce byte {i} should be detected"
        );
    }
}

#[test]
fn tag_tampering_detected() {
    let key = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key, b"tag-critical data");

    let mut tampered = envelope.clone();
    tampered.tag[0] ^= 0x01;
    assert!(open(&key, &tampered, &aad).is_err());
}

#[test]
fn single_byte_aad_change_detected() {
    let key = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key, b"binding test");

    let mut altered = aad.clone();
    let last = altered.len() - 1;
    altered[last] ^= 0x01;
    assert!(open(&key, &envelope, &altered).is_err());
}

#[test]
fn truncated_ciphertext_fails() {
    let key = SymmetricKey::generate();
    let (mut envelope, aad) = bound_envelope(&key, b"data that will be truncated");
    envelope.ciphertext.truncate(3);
    assert!(open(&key, &envelope, &aad).is_err());
}

#[test]
fn ciphertext_substitution_across_entities_fails() {
    let key = SymmetricKey::generate();
    let tenant = TenantId::new();
    let entity_a = EntityId::new();
    let entity_b = EntityId::new();

    let aad_a = field_aad(&tenant, &entity_a, "name");
    let aad_b = field_aad(&tenant, &entity_b, "name");
    let envelope_a = seal(&key, b"alice's entity name", &aad_a).unwrap();

    // The triple from entity A presented as entity B's field must not verify.
    assert!(open(&key, &envelope_a, &aad_b).is_err());
    assert_eq!(open(&key, &envelope_a, &aad_a).unwrap(), b"alice's entity name");
}

// ── Boundary Conditions ──

#[test]
fn empty_plaintext_roundtrip() {
    let key = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key, b"");
    assert!(open(&key, &envelope, &aad).unwrap().is_empty());
}

#[test]
fn large_plaintext_roundtrip() {
    let key = SymmetricKey::generate();
    let large = vec![0xAB; 1024 * 1024];
    let aad = dek_aad(&TenantId::new());
    let envelope = seal(&key, &large, &aad).unwrap();
    assert_eq!(open(&key, &envelope, &aad).unwrap(), large);
}

// ── Nonce Uniqueness ──

#[test]
fn nonces_never_collide_across_many_seals() {
    let key = SymmetricKey::generate();
    let aad = dek_aad(&TenantId::new());

    let mut seen = HashSet::with_capacity(10_000);
    for _ in 0..10_000 {
        let envelope = seal(&key, b"x", &aad).unwrap();
        assert!(
            seen.insert(envelope.nonce),
            "192-bit random nonce collided — RNG is broken"
        );
    }
}

// ── KDF + Wrapping Pipeline ──

#[test]
fn passphrase_to_field_pipeline() {
    let tenant = TenantId::new();
    let entity = EntityId::new();
    let salt = Salt::random();
    let params = KdfParams::light();

    // Derive KEK, wrap a fresh DEK, encrypt a field under the DEK.
    let kek = derive_key("correct-horse-battery-staple-2024", &salt, &params).unwrap();
    let dek = generate_dek();
    let wrapped = wrap_dek(&kek, &dek, &tenant).unwrap();
    let aad = field_aad(&tenant, &entity, "body");
    let field = seal(&dek, b"the stored fact body", &aad).unwrap();

    // Re-derive from the same passphrase and recover everything.
    let kek_again = derive_key("correct-horse-battery-staple-2024", &salt, &params).unwrap();
    let dek_again = unwrap_dek(&kek_again, &wrapped, &tenant).unwrap();
    assert_eq!(open(&dek_again, &field, &aad).unwrap(), b"the stored fact body");

    // A wrong passphrase fails at the unwrap step, before any field access.
    let bad_kek = derive_key("wrong-passphrase", &salt, &params).unwrap();
    assert!(matches!(
        unwrap_dek(&bad_kek, &wrapped, &tenant).unwrap_err(),
        CryptoError::AuthFailure
    ));
}

// ── Serialization ──

#[test]
fn envelope_json_roundtrip() {
    let key = SymmetricKey::generate();
    let (envelope, aad) = bound_envelope(&key, b"serialize me");

    let json = serde_json::to_vec(&envelope).unwrap();
    let restored: Envelope = serde_json::from_slice(&json).unwrap();
    assert_eq!(open(&key, &restored, &aad).unwrap(), b"serialize me");
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn seal_open_always_roundtrips(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = SymmetricKey::generate();
            let aad = dek_aad(&TenantId::new());
            let envelope = seal(&key, &plaintext, &aad).unwrap();
            prop_assert_eq!(open(&key, &envelope, &aad).unwrap(), plaintext);
        }

        #[test]
        fn open_never_succeeds_under_different_key(plaintext in proptest::collection::vec(any::<u8>(), 1..128)) {
            let key = SymmetricKey::generate();
            let other = SymmetricKey::generate();
            let aad = dek_aad(&TenantId::new());
            let envelope = seal(&key, &plaintext, &aad).unwrap();
            prop_assert!(open(&other, &envelope, &aad).is_err());
        }
    }
}
