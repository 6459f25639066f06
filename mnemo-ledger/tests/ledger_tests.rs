//! Audit chain integrity tests.
//!
//! Tampering is done through the shared connection, the way an attacker
//! with database access would — the ledger API itself never mutates rows.

use duckdb::{params, Connection};
use mnemo_ledger::{
    AuditLedger, ChainStatus, EventPayload, LedgerError, GENESIS_HASH,
};
use mnemo_types::{EntityId, TenantId};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn shared_ledger() -> (AuditLedger, Arc<Mutex<Connection>>) {
    let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let ledger = AuditLedger::with_connection(conn.clone()).unwrap();
    (ledger, conn)
}

fn append_n(ledger: &AuditLedger, tenant: &TenantId, n: u64) {
    for i in 0..n {
        ledger
            .append(
                tenant,
                "field_written",
                "alice",
                EventPayload::FieldWritten {
                    entity_id: EntityId::new(),
                    field_name: format!("field-{i}"),
                },
            )
            .unwrap();
    }
}

#[test]
fn appended_chain_verifies() {
    let (ledger, _conn) = shared_ledger();
    let tenant = TenantId::new();

    append_n(&ledger, &tenant, 5);
    assert_eq!(ledger.verify(&tenant).unwrap(), ChainStatus::Ok { length: 5 });
}

#[test]
fn empty_chain_verifies() {
    let (ledger, _conn) = shared_ledger();
    assert_eq!(
        ledger.verify(&TenantId::new()).unwrap(),
        ChainStatus::Ok { length: 0 }
    );
}

#[test]
fn first_event_links_to_genesis() {
    let (ledger, _conn) = shared_ledger();
    let tenant = TenantId::new();

    let event = ledger
        .append(&tenant, "tenant_created", "admin", EventPayload::TenantCreated)
        .unwrap();
    assert_eq!(event.seq, 1);
    assert_eq!(event.prev_hash, GENESIS_HASH);
}

#[test]
fn events_link_by_hash_and_roundtrip() {
    let (ledger, _conn) = shared_ledger();
    let tenant = TenantId::new();
    let entity = EntityId::new();

    ledger
        .append(&tenant, "tenant_created", "admin", EventPayload::TenantCreated)
        .unwrap();
    ledger
        .append(
            &tenant,
            "entity_created",
            "alice",
            EventPayload::EntityCreated { entity_id: entity },
        )
        .unwrap();

    let events = ledger.events(&tenant).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].prev_hash, events[0].current_hash);
    assert_eq!(
        events[1].payload,
        EventPayload::EntityCreated { entity_id: entity }
    );
    assert_eq!(ledger.tail(&tenant).unwrap(), Some((2, events[1].current_hash)));
}

#[test]
fn tampered_payload_breaks_chain_at_exact_position() {
    let (ledger, conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 5);

    // Flip the payload of event 3 directly in storage.
    conn.lock()
        .unwrap()
        .execute(
            "UPDATE audit_events SET payload_json = ? WHERE tenant_id = ? AND seq = 3",
            params![
                r#"{"field_name":"forged","kind":"field_written"}"#,
                tenant.to_string()
            ],
        )
        .unwrap();

    match ledger.verify(&tenant).unwrap() {
        ChainStatus::Broken {
            at_seq,
            expected_hash,
            actual_hash,
        } => {
            assert_eq!(at_seq, 3);
            assert_ne!(expected_hash, actual_hash);
        }
        other => panic!("expected Broken at seq 3, got {other:?}"),
    }
}

#[test]
fn tampered_actor_breaks_chain() {
    let (ledger, conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 4);

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE audit_events SET actor = 'mallory' WHERE tenant_id = ? AND seq = 2",
            params![tenant.to_string()],
        )
        .unwrap();

    assert!(matches!(
        ledger.verify(&tenant).unwrap(),
        ChainStatus::Broken { at_seq: 2, .. }
    ));
}

#[test]
fn tampered_timestamp_breaks_chain() {
    let (ledger, conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 3);

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE audit_events SET timestamp_ms = timestamp_ms + 1 WHERE tenant_id = ? AND seq = 1",
            params![tenant.to_string()],
        )
        .unwrap();

    assert!(matches!(
        ledger.verify(&tenant).unwrap(),
        ChainStatus::Broken { at_seq: 1, .. }
    ));
}

#[test]
fn deleted_middle_event_breaks_chain() {
    let (ledger, conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 5);

    conn.lock()
        .unwrap()
        .execute(
            "DELETE FROM audit_events WHERE tenant_id = ? AND seq = 2",
            params![tenant.to_string()],
        )
        .unwrap();

    assert!(matches!(
        ledger.verify(&tenant).unwrap(),
        ChainStatus::Broken { .. }
    ));
}

#[test]
fn truncated_tail_breaks_chain() {
    let (ledger, conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 5);

    // Deleting the newest event leaves a self-consistent prefix; the tail
    // pointer is what exposes the truncation.
    conn.lock()
        .unwrap()
        .execute(
            "DELETE FROM audit_events WHERE tenant_id = ? AND seq = 5",
            params![tenant.to_string()],
        )
        .unwrap();

    assert!(matches!(
        ledger.verify(&tenant).unwrap(),
        ChainStatus::Broken { at_seq: 5, .. }
    ));
}

#[test]
fn verification_does_not_halt_appends() {
    let (ledger, conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 3);

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE audit_events SET actor = 'mallory' WHERE tenant_id = ? AND seq = 1",
            params![tenant.to_string()],
        )
        .unwrap();

    assert!(matches!(
        ledger.verify(&tenant).unwrap(),
        ChainStatus::Broken { .. }
    ));
    // A broken chain is surfaced, but the ledger keeps serving appends.
    ledger
        .append(&tenant, "tenant_created", "admin", EventPayload::TenantCreated)
        .unwrap();
}

#[test]
fn chains_are_independent_per_tenant() {
    let (ledger, conn) = shared_ledger();
    let tenant_a = TenantId::new();
    let tenant_b = TenantId::new();
    append_n(&ledger, &tenant_a, 3);
    append_n(&ledger, &tenant_b, 3);

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE audit_events SET actor = 'mallory' WHERE tenant_id = ? AND seq = 2",
            params![tenant_a.to_string()],
        )
        .unwrap();

    assert!(matches!(
        ledger.verify(&tenant_a).unwrap(),
        ChainStatus::Broken { at_seq: 2, .. }
    ));
    assert_eq!(
        ledger.verify(&tenant_b).unwrap(),
        ChainStatus::Ok { length: 3 }
    );
}

#[test]
fn forged_row_at_next_seq_is_a_fork_and_halts_tenant() {
    let (ledger, conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 2);

    // An external writer linking to the current tail without going through
    // the tail pointer.
    conn.lock()
        .unwrap()
        .execute(
            "INSERT INTO audit_events
             (tenant_id, seq, event_type, actor, payload_json, timestamp_ms, prev_hash, current_hash)
             VALUES (?, 3, 'forged', 'mallory', '{}', 0, ?, ?)",
            params![tenant.to_string(), vec![0u8; 32], vec![1u8; 32]],
        )
        .unwrap();

    let err = ledger
        .append(&tenant, "tenant_created", "admin", EventPayload::TenantCreated)
        .unwrap_err();
    assert!(matches!(err, LedgerError::ChainFork { seq: 3, .. }));

    // Further appends stay rejected until an operator intervenes.
    let err = ledger
        .append(&tenant, "tenant_created", "admin", EventPayload::TenantCreated)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Halted(_)));

    // Other tenants keep working.
    let other = TenantId::new();
    append_n(&ledger, &other, 1);

    // Repair out of band, clear the fork, and appends resume.
    conn.lock()
        .unwrap()
        .execute(
            "DELETE FROM audit_events WHERE tenant_id = ? AND seq = 3",
            params![tenant.to_string()],
        )
        .unwrap();
    ledger.clear_fork(&tenant);
    ledger
        .append(&tenant, "tenant_created", "admin", EventPayload::TenantCreated)
        .unwrap();
    assert_eq!(ledger.verify(&tenant).unwrap(), ChainStatus::Ok { length: 3 });
}

#[test]
fn retention_purge_rebases_the_chain() {
    let (ledger, _conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 5);

    let purge_event = ledger.purge_through(&tenant, "retention-bot", 3).unwrap();
    assert_eq!(purge_event.seq, 6);
    assert_eq!(
        purge_event.payload,
        EventPayload::RetentionPurged {
            through_seq: 3,
            purged: 3
        }
    );

    // Events 4, 5, and the purge record survive; the chain verifies from
    // the new anchor.
    let events = ledger.events(&tenant).unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![4, 5, 6]);
    assert_eq!(ledger.verify(&tenant).unwrap(), ChainStatus::Ok { length: 3 });
}

#[test]
fn purge_of_missing_seq_is_rejected() {
    let (ledger, _conn) = shared_ledger();
    let tenant = TenantId::new();
    append_n(&ledger, &tenant, 2);

    let err = ledger.purge_through(&tenant, "retention-bot", 9).unwrap_err();
    assert!(matches!(err, LedgerError::EventNotFound { seq: 9, .. }));
}

#[test]
fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("audit.db");
    let tenant = TenantId::new();

    {
        let ledger = AuditLedger::open(&db_path).unwrap();
        append_n(&ledger, &tenant, 4);
    }

    let ledger = AuditLedger::open(&db_path).unwrap();
    assert_eq!(ledger.verify(&tenant).unwrap(), ChainStatus::Ok { length: 4 });
    append_n(&ledger, &tenant, 1);
    assert_eq!(ledger.verify(&tenant).unwrap(), ChainStatus::Ok { length: 5 });
}
