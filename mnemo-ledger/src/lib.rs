//! Append-only, tamper-evident audit chain, one chain per tenant.
//!
//! Each event links to its predecessor by hash. The append path runs inside
//! a single transaction that reads the tail pointer, inserts the new event,
//! and advances the pointer — so two writers can never both link to the
//! same tail. A `(tenant_id, seq)` primary key backstops the pointer: if an
//! external writer slips a row in anyway, the append reports a fork and the
//! tenant's ledger freezes until an operator clears it.
//!
//! Verification is a pure read-side walk and never blocks appends.

mod error;
mod event;

pub use error::{LedgerError, LedgerResult};
pub use event::{
    canonical_json, canonical_payload, compute_event_hash, AuditEvent, EventPayload, GENESIS_HASH,
    HASH_SIZE,
};

use chrono::Utc;
use duckdb::{params, Connection};
use mnemo_types::TenantId;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Outcome of a chain verification walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every link intact.
    Ok { length: u64 },
    /// First mismatch, with both hash values so operators can localize the
    /// tampering instead of only learning "the chain is invalid".
    Broken {
        at_seq: u64,
        expected_hash: [u8; HASH_SIZE],
        actual_hash: [u8; HASH_SIZE],
    },
}

struct ChainState {
    tail_seq: u64,
    tail_hash: [u8; HASH_SIZE],
    anchor_seq: u64,
    anchor_hash: [u8; HASH_SIZE],
}

/// DuckDB-backed audit chain ledger.
pub struct AuditLedger {
    conn: Arc<Mutex<Connection>>,
    /// Tenants with a detected fork; appends rejected until cleared.
    forked: Mutex<HashSet<TenantId>>,
}

impl AuditLedger {
    /// Opens or creates a ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    /// Opens an in-memory ledger (for testing).
    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    /// Builds a ledger over an existing connection, creating tables as
    /// needed. Lets the ledger share one database with the envelope store.
    pub fn with_connection(conn: Arc<Mutex<Connection>>) -> LedgerResult<Self> {
        {
            let guard = conn.lock().expect("connection lock poisoned");
            initialize_ledger_schema(&guard)?;
        }
        Ok(Self {
            conn,
            forked: Mutex::new(HashSet::new()),
        })
    }

    /// Appends an event to the tenant's chain and returns it.
    ///
    /// Tail read, event insert, and tail advance happen in one transaction;
    /// appends for a tenant are strictly serialized.
    pub fn append(
        &self,
        tenant_id: &TenantId,
        event_type: &str,
        actor: &str,
        payload: EventPayload,
    ) -> LedgerResult<AuditEvent> {
        self.ensure_not_forked(tenant_id)?;

        let payload_canonical = canonical_payload(&payload)?;
        let timestamp_ms = Utc::now().timestamp_millis();

        let conn = self.conn.lock().expect("connection lock poisoned");
        conn.execute_batch("BEGIN TRANSACTION")?;

        let state = match load_chain_state(&conn, tenant_id) {
            Ok(state) => state,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        };
        let (tail_seq, tail_hash) = match &state {
            Some(s) => (s.tail_seq, s.tail_hash),
            None => (0, GENESIS_HASH),
        };
        let seq = tail_seq + 1;
        let current_hash = compute_event_hash(
            &tail_hash,
            event_type,
            actor,
            timestamp_ms,
            &payload_canonical,
        );

        let inserted = conn.execute(
            "INSERT INTO audit_events
             (tenant_id, seq, event_type, actor, payload_json, timestamp_ms, prev_hash, current_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                tenant_id.to_string(),
                seq as i64,
                event_type,
                actor,
                payload_canonical,
                timestamp_ms,
                tail_hash.to_vec(),
                current_hash.to_vec(),
            ],
        );

        if let Err(err) = inserted {
            let _ = conn.execute_batch("ROLLBACK");
            // A row already at this seq means something linked to our tail
            // outside the tail pointer — a fork, not a transient failure.
            let occupied: i64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_events WHERE tenant_id = ? AND seq = ?",
                params![tenant_id.to_string(), seq as i64],
                |row| row.get(0),
            )?;
            if occupied > 0 {
                warn!(tenant = %tenant_id, seq, "audit chain fork detected; halting appends");
                self.forked
                    .lock()
                    .expect("fork set lock poisoned")
                    .insert(*tenant_id);
                return Err(LedgerError::ChainFork {
                    tenant_id: *tenant_id,
                    seq,
                });
            }
            return Err(err.into());
        }

        let advance = if state.is_some() {
            conn.execute(
                "UPDATE chain_state SET tail_seq = ?, tail_hash = ? WHERE tenant_id = ?",
                params![seq as i64, current_hash.to_vec(), tenant_id.to_string()],
            )
        } else {
            conn.execute(
                "INSERT INTO chain_state (tenant_id, tail_seq, tail_hash, anchor_seq, anchor_hash)
                 VALUES (?, ?, ?, 0, ?)",
                params![
                    tenant_id.to_string(),
                    seq as i64,
                    current_hash.to_vec(),
                    GENESIS_HASH.to_vec(),
                ],
            )
        };
        if let Err(err) = advance {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(err.into());
        }
        conn.execute_batch("COMMIT")?;

        Ok(AuditEvent {
            tenant_id: *tenant_id,
            seq,
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            payload,
            timestamp_ms,
            prev_hash: tail_hash,
            current_hash,
        })
    }

    /// Replays the tenant's chain from its anchor and checks every link.
    ///
    /// Stops at the first mismatch. Read-only; a broken chain never halts
    /// appends, and other tenants are unaffected.
    pub fn verify(&self, tenant_id: &TenantId) -> LedgerResult<ChainStatus> {
        let conn = self.conn.lock().expect("connection lock poisoned");

        let state = load_chain_state(&conn, tenant_id)?;
        let (anchor_seq, anchor_hash, tail) = match &state {
            Some(s) => (s.anchor_seq, s.anchor_hash, Some((s.tail_seq, s.tail_hash))),
            None => (0, GENESIS_HASH, None),
        };

        let mut stmt = conn.prepare(
            "SELECT seq, event_type, actor, payload_json, timestamp_ms, prev_hash, current_hash
             FROM audit_events WHERE tenant_id = ? ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![tenant_id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, Vec<u8>>(6)?,
            ))
        })?;

        let mut expected_prev = anchor_hash;
        let mut expected_seq = anchor_seq + 1;
        let mut length = 0u64;

        for row in rows {
            let (seq, event_type, actor, payload_json, timestamp_ms, prev_raw, cur_raw) = row?;
            let seq = seq as u64;
            let prev_hash = hash_from_blob(&prev_raw)?;
            let current_hash = hash_from_blob(&cur_raw)?;

            // A gap or a bad back-link both mean the stored predecessor is
            // not what this event was hashed against.
            if seq != expected_seq || prev_hash != expected_prev {
                return Ok(ChainStatus::Broken {
                    at_seq: seq,
                    expected_hash: expected_prev,
                    actual_hash: prev_hash,
                });
            }

            let recomputed = compute_event_hash(
                &prev_hash,
                &event_type,
                &actor,
                timestamp_ms,
                &payload_json,
            );
            if recomputed != current_hash {
                return Ok(ChainStatus::Broken {
                    at_seq: seq,
                    expected_hash: recomputed,
                    actual_hash: current_hash,
                });
            }

            expected_prev = current_hash;
            expected_seq = seq + 1;
            length += 1;
        }

        // The tail pointer must agree with the last event, or the chain was
        // truncated from the end.
        if let Some((tail_seq, tail_hash)) = tail {
            if expected_seq != tail_seq + 1 || expected_prev != tail_hash {
                return Ok(ChainStatus::Broken {
                    at_seq: tail_seq,
                    expected_hash: tail_hash,
                    actual_hash: expected_prev,
                });
            }
        }

        Ok(ChainStatus::Ok { length })
    }

    /// Reads the tenant's events in chain order.
    pub fn events(&self, tenant_id: &TenantId) -> LedgerResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT seq, event_type, actor, payload_json, timestamp_ms, prev_hash, current_hash
             FROM audit_events WHERE tenant_id = ? ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![tenant_id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, Vec<u8>>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, event_type, actor, payload_json, timestamp_ms, prev_raw, cur_raw) = row?;
            events.push(AuditEvent {
                tenant_id: *tenant_id,
                seq: seq as u64,
                event_type,
                actor,
                payload: serde_json::from_str(&payload_json)?,
                timestamp_ms,
                prev_hash: hash_from_blob(&prev_raw)?,
                current_hash: hash_from_blob(&cur_raw)?,
            });
        }
        Ok(events)
    }

    /// Current tail `(seq, hash)`, or `None` for an empty chain.
    pub fn tail(&self, tenant_id: &TenantId) -> LedgerResult<Option<(u64, [u8; HASH_SIZE])>> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        Ok(load_chain_state(&conn, tenant_id)?.map(|s| (s.tail_seq, s.tail_hash)))
    }

    /// Retention purge: drops every event with `seq <= through_seq` and
    /// anchors the chain at the purged tail's hash, then audits the purge
    /// itself as a new event.
    pub fn purge_through(
        &self,
        tenant_id: &TenantId,
        actor: &str,
        through_seq: u64,
    ) -> LedgerResult<AuditEvent> {
        self.ensure_not_forked(tenant_id)?;

        let purged;
        {
            let conn = self.conn.lock().expect("connection lock poisoned");
            conn.execute_batch("BEGIN TRANSACTION")?;

            let anchor_hash: Vec<u8> = match conn.query_row(
                "SELECT current_hash FROM audit_events WHERE tenant_id = ? AND seq = ?",
                params![tenant_id.to_string(), through_seq as i64],
                |row| row.get(0),
            ) {
                Ok(hash) => hash,
                Err(duckdb::Error::QueryReturnedNoRows) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(LedgerError::EventNotFound {
                        tenant_id: *tenant_id,
                        seq: through_seq,
                    });
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(e.into());
                }
            };

            let deleted = conn.execute(
                "DELETE FROM audit_events WHERE tenant_id = ? AND seq <= ?",
                params![tenant_id.to_string(), through_seq as i64],
            );
            let advanced = conn.execute(
                "UPDATE chain_state SET anchor_seq = ?, anchor_hash = ? WHERE tenant_id = ?",
                params![through_seq as i64, anchor_hash, tenant_id.to_string()],
            );
            match (deleted, advanced) {
                (Ok(n), Ok(_)) => purged = n,
                (Err(e), _) | (_, Err(e)) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(e.into());
                }
            }
            conn.execute_batch("COMMIT")?;
        }

        self.append(
            tenant_id,
            "retention_purged",
            actor,
            EventPayload::RetentionPurged {
                through_seq,
                purged: purged as u64,
            },
        )
    }

    /// Operator intervention after a fork: allow appends again. The
    /// conflicting rows must have been repaired out of band.
    pub fn clear_fork(&self, tenant_id: &TenantId) {
        self.forked
            .lock()
            .expect("fork set lock poisoned")
            .remove(tenant_id);
    }

    fn ensure_not_forked(&self, tenant_id: &TenantId) -> LedgerResult<()> {
        if self
            .forked
            .lock()
            .expect("fork set lock poisoned")
            .contains(tenant_id)
        {
            return Err(LedgerError::Halted(*tenant_id));
        }
        Ok(())
    }
}

fn load_chain_state(conn: &Connection, tenant_id: &TenantId) -> LedgerResult<Option<ChainState>> {
    let result = conn.query_row(
        "SELECT tail_seq, tail_hash, anchor_seq, anchor_hash FROM chain_state WHERE tenant_id = ?",
        params![tenant_id.to_string()],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        },
    );

    match result {
        Ok((tail_seq, tail_raw, anchor_seq, anchor_raw)) => Ok(Some(ChainState {
            tail_seq: tail_seq as u64,
            tail_hash: hash_from_blob(&tail_raw)?,
            anchor_seq: anchor_seq as u64,
            anchor_hash: hash_from_blob(&anchor_raw)?,
        })),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn hash_from_blob(raw: &[u8]) -> LedgerResult<[u8; HASH_SIZE]> {
    if raw.len() != HASH_SIZE {
        return Err(LedgerError::Corrupt(format!("hash length {}", raw.len())));
    }
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(raw);
    Ok(hash)
}

fn initialize_ledger_schema(conn: &Connection) -> LedgerResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS audit_events (
            tenant_id VARCHAR NOT NULL,
            seq BIGINT NOT NULL,
            event_type VARCHAR NOT NULL,
            actor VARCHAR NOT NULL,
            payload_json TEXT NOT NULL,
            timestamp_ms BIGINT NOT NULL,
            prev_hash BLOB NOT NULL,
            current_hash BLOB NOT NULL,
            PRIMARY KEY (tenant_id, seq)
        );
        CREATE TABLE IF NOT EXISTS chain_state (
            tenant_id VARCHAR PRIMARY KEY,
            tail_seq BIGINT NOT NULL,
            tail_hash BLOB NOT NULL,
            anchor_seq BIGINT NOT NULL,
            anchor_hash BLOB NOT NULL
        );
        "#,
    )?;
    Ok(())
}
