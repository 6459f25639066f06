//! Audit events, canonical serialization, and chain hashing.
//!
//! Every mutating operation appends one event. Each event's hash covers the
//! previous event's hash, so retroactive insertion, alteration, or removal
//! breaks the chain.

use crate::error::{LedgerError, LedgerResult};
use mnemo_types::{EntityId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chain hash size in bytes (BLAKE3).
pub const HASH_SIZE: usize = 32;

/// `prev_hash` of the first event in a chain.
pub const GENESIS_HASH: [u8; HASH_SIZE] = [0u8; HASH_SIZE];

const CHAIN_DOMAIN: &str = "mnemo:audit:v1";

/// One immutable entry in a tenant's audit chain.
///
/// Corrections are new events; an appended event is never updated or
/// deleted (retention purges truncate whole prefixes and move the anchor).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub tenant_id: TenantId,
    /// 1-based position in the tenant's chain; strictly increasing.
    pub seq: u64,
    pub event_type: String,
    pub actor: String,
    pub payload: EventPayload,
    pub timestamp_ms: i64,
    pub prev_hash: [u8; HASH_SIZE],
    pub current_hash: [u8; HASH_SIZE],
}

/// Structured audit payload: known kinds plus an opaque fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    TenantCreated,
    PassphraseRotated,
    EntityCreated {
        entity_id: EntityId,
    },
    EntityDeleted {
        entity_id: EntityId,
    },
    FieldWritten {
        entity_id: EntityId,
        field_name: String,
    },
    RetentionPurged {
        through_seq: u64,
        purged: u64,
    },
    /// Arbitrary structured payload from a consumer this core does not know
    /// about. Canonicalized like everything else, so it hashes stably.
    Opaque {
        data: Value,
    },
}

/// Canonical JSON: sorted object keys, no whitespace, no non-finite
/// numbers. Deterministic regardless of the key ordering the caller used.
pub fn canonical_json(value: &Value) -> LedgerResult<String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(LedgerError::NonFiniteNumber);
            }
            Ok(n.to_string())
        }
        Value::String(s) => serde_json::to_string(s).map_err(LedgerError::from),
        Value::Array(items) => {
            let parts: LedgerResult<Vec<String>> = items.iter().map(canonical_json).collect();
            Ok(format!("[{}]", parts?.join(",")))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: LedgerResult<Vec<String>> = keys
                .iter()
                .map(|k| {
                    let v = canonical_json(&map[*k])?;
                    Ok(format!("{}:{}", serde_json::to_string(*k)?, v))
                })
                .collect();
            Ok(format!("{{{}}}", parts?.join(",")))
        }
    }
}

/// Canonicalizes an [`EventPayload`] for hashing and persistence.
pub fn canonical_payload(payload: &EventPayload) -> LedgerResult<String> {
    canonical_json(&serde_json::to_value(payload)?)
}

/// Computes an event's chain hash.
///
/// BLAKE3 over a NUL-separated, domain-prefixed message covering the
/// previous hash, the canonical payload, and the remaining event fields.
/// Deterministic given its inputs.
pub fn compute_event_hash(
    prev_hash: &[u8; HASH_SIZE],
    event_type: &str,
    actor: &str,
    timestamp_ms: i64,
    canonical_payload: &str,
) -> [u8; HASH_SIZE] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(CHAIN_DOMAIN.as_bytes());
    hasher.update(&[0]);
    hasher.update(prev_hash);
    hasher.update(&[0]);
    hasher.update(canonical_payload.as_bytes());
    hasher.update(&[0]);
    hasher.update(event_type.as_bytes());
    hasher.update(&[0]);
    hasher.update(actor.as_bytes());
    hasher.update(&[0]);
    hasher.update(&timestamp_ms.to_le_bytes());
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = canonical_json(&json!({"z": 1, "a": 2, "m": 3})).unwrap();
        let b = canonical_json(&json!({"a": 2, "m": 3, "z": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn canonical_json_nested() {
        let out = canonical_json(&json!({"b": {"d": 1, "c": 2}, "a": 3})).unwrap();
        assert_eq!(out, r#"{"a":3,"b":{"c":2,"d":1}}"#);
    }

    #[test]
    fn canonical_json_primitives() {
        assert_eq!(canonical_json(&Value::Null).unwrap(), "null");
        assert_eq!(canonical_json(&json!(true)).unwrap(), "true");
        assert_eq!(canonical_json(&json!(42)).unwrap(), "42");
        assert_eq!(canonical_json(&json!("hi")).unwrap(), r#""hi""#);
        assert_eq!(canonical_json(&json!([3, 1, 2])).unwrap(), "[3,1,2]");
    }

    #[test]
    fn payload_canonical_form_is_stable() {
        let payload = EventPayload::FieldWritten {
            entity_id: EntityId::new(),
            field_name: "body".to_string(),
        };
        assert_eq!(
            canonical_payload(&payload).unwrap(),
            canonical_payload(&payload).unwrap()
        );
    }

    #[test]
    fn opaque_payload_roundtrips_through_canonical_form() {
        let payload = EventPayload::Opaque {
            data: json!({"source": "ingestion", "chunk": 7}),
        };
        let canonical = canonical_payload(&payload).unwrap();
        let back: EventPayload = serde_json::from_str(&canonical).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn hash_is_deterministic_and_input_sensitive() {
        let prev = GENESIS_HASH;
        let a = compute_event_hash(&prev, "entity_created", "alice", 1000, "{}");
        let b = compute_event_hash(&prev, "entity_created", "alice", 1000, "{}");
        assert_eq!(a, b);

        assert_ne!(a, compute_event_hash(&prev, "entity_deleted", "alice", 1000, "{}"));
        assert_ne!(a, compute_event_hash(&prev, "entity_created", "bob", 1000, "{}"));
        assert_ne!(a, compute_event_hash(&prev, "entity_created", "alice", 1001, "{}"));
        assert_ne!(a, compute_event_hash(&prev, "entity_created", "alice", 1000, "[]"));
        let other_prev = [1u8; HASH_SIZE];
        assert_ne!(a, compute_event_hash(&other_prev, "entity_created", "alice", 1000, "{}"));
    }
}
