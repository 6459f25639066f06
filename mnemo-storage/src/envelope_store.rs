//! Persistence for tenant key material and encrypted content fields.
//!
//! Pure persistence boundary — no cryptographic logic. Every envelope is
//! written as its full `(ciphertext, nonce, tag)` triple in one statement,
//! so a partial triple can never land in the database.

use crate::error::{StorageError, StorageResult};
use chrono::Utc;
use duckdb::{params, Connection};
use mnemo_crypto::{Envelope, Salt, NONCE_SIZE, TAG_SIZE};
use mnemo_types::{EntityId, TenantId};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// DuckDB-backed store for tenant records and encrypted fields.
#[derive(Clone)]
pub struct EnvelopeStore {
    conn: Arc<Mutex<Connection>>,
}

impl EnvelopeStore {
    /// Opens or creates an envelope store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb(path, "128MB", 1)?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    /// Opens an in-memory envelope store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    /// Builds a store over an existing connection, creating tables as
    /// needed. Lets the store share one database with the audit ledger.
    pub fn with_connection(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        {
            let guard = conn.lock().expect("connection lock poisoned");
            initialize_envelope_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    /// Creates a tenant row with its salt and wrapped DEK.
    pub fn create_tenant(
        &self,
        tenant_id: &TenantId,
        salt: &Salt,
        wrapped_dek: &Envelope,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().expect("connection lock poisoned");

        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tenants WHERE tenant_id = ?",
            params![tenant_id.to_string()],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(StorageError::TenantExists(tenant_id.to_string()));
        }

        conn.execute(
            "INSERT INTO tenants (tenant_id, salt, dek_ciphertext, dek_nonce, dek_tag, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                tenant_id.to_string(),
                salt.as_bytes().to_vec(),
                wrapped_dek.ciphertext.clone(),
                wrapped_dek.nonce.to_vec(),
                wrapped_dek.tag.to_vec(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn tenant_exists(&self, tenant_id: &TenantId) -> StorageResult<bool> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tenants WHERE tenant_id = ?",
            params![tenant_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Loads a tenant's KDF salt.
    pub fn load_salt(&self, tenant_id: &TenantId) -> StorageResult<Salt> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let bytes: Vec<u8> = conn
            .query_row(
                "SELECT salt FROM tenants WHERE tenant_id = ?",
                params![tenant_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| not_found_tenant(e, tenant_id))?;

        Salt::from_slice(&bytes)
            .map_err(|_| StorageError::Corrupt(format!("salt length {} for tenant", bytes.len())))
    }

    /// Loads a tenant's wrapped DEK triple.
    pub fn load_wrapped_dek(&self, tenant_id: &TenantId) -> StorageResult<Envelope> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let (ciphertext, nonce, tag): (Vec<u8>, Vec<u8>, Vec<u8>) = conn
            .query_row(
                "SELECT dek_ciphertext, dek_nonce, dek_tag FROM tenants WHERE tenant_id = ?",
                params![tenant_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| not_found_tenant(e, tenant_id))?;

        envelope_from_parts(ciphertext, &nonce, &tag)
    }

    /// Replaces a tenant's wrapped DEK (same salt). Used when the DEK is
    /// re-wrapped without a passphrase change.
    pub fn store_wrapped_dek(
        &self,
        tenant_id: &TenantId,
        wrapped_dek: &Envelope,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let affected = conn.execute(
            "UPDATE tenants SET dek_ciphertext = ?, dek_nonce = ?, dek_tag = ?, rewrapped_at = ?
             WHERE tenant_id = ?",
            params![
                wrapped_dek.ciphertext.clone(),
                wrapped_dek.nonce.to_vec(),
                wrapped_dek.tag.to_vec(),
                Utc::now().timestamp_millis(),
                tenant_id.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StorageError::TenantNotFound(tenant_id.to_string()));
        }
        Ok(())
    }

    /// Replaces a tenant's salt and wrapped DEK together (passphrase
    /// rotation). One statement, so the pair can never diverge.
    pub fn replace_tenant_keys(
        &self,
        tenant_id: &TenantId,
        salt: &Salt,
        wrapped_dek: &Envelope,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let affected = conn.execute(
            "UPDATE tenants SET salt = ?, dek_ciphertext = ?, dek_nonce = ?, dek_tag = ?, rewrapped_at = ?
             WHERE tenant_id = ?",
            params![
                salt.as_bytes().to_vec(),
                wrapped_dek.ciphertext.clone(),
                wrapped_dek.nonce.to_vec(),
                wrapped_dek.tag.to_vec(),
                Utc::now().timestamp_millis(),
                tenant_id.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StorageError::TenantNotFound(tenant_id.to_string()));
        }
        Ok(())
    }

    /// Stores an encrypted field triple atomically (insert or replace).
    pub fn store_field(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        field_name: &str,
        envelope: &Envelope,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO encrypted_fields
             (entity_id, field_name, tenant_id, ciphertext, nonce, tag, modified_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entity_id.to_string(),
                field_name,
                tenant_id.to_string(),
                envelope.ciphertext.clone(),
                envelope.nonce.to_vec(),
                envelope.tag.to_vec(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Loads an encrypted field triple.
    pub fn load_field(&self, entity_id: &EntityId, field_name: &str) -> StorageResult<Envelope> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let (ciphertext, nonce, tag): (Vec<u8>, Vec<u8>, Vec<u8>) = conn
            .query_row(
                "SELECT ciphertext, nonce, tag FROM encrypted_fields
                 WHERE entity_id = ? AND field_name = ?",
                params![entity_id.to_string(), field_name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| match e {
                duckdb::Error::QueryReturnedNoRows => StorageError::FieldNotFound {
                    entity_id: entity_id.to_string(),
                    field_name: field_name.to_string(),
                },
                other => StorageError::Database(other),
            })?;

        envelope_from_parts(ciphertext, &nonce, &tag)
    }

    pub fn delete_field(&self, entity_id: &EntityId, field_name: &str) -> StorageResult<()> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let affected = conn.execute(
            "DELETE FROM encrypted_fields WHERE entity_id = ? AND field_name = ?",
            params![entity_id.to_string(), field_name],
        )?;
        if affected == 0 {
            return Err(StorageError::FieldNotFound {
                entity_id: entity_id.to_string(),
                field_name: field_name.to_string(),
            });
        }
        Ok(())
    }

    /// Lists the field names stored for an entity.
    pub fn list_entity_fields(&self, entity_id: &EntityId) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT field_name FROM encrypted_fields WHERE entity_id = ? ORDER BY field_name",
        )?;
        let names = stmt
            .query_map(params![entity_id.to_string()], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }
}

fn not_found_tenant(err: duckdb::Error, tenant_id: &TenantId) -> StorageError {
    match err {
        duckdb::Error::QueryReturnedNoRows => StorageError::TenantNotFound(tenant_id.to_string()),
        other => StorageError::Database(other),
    }
}

fn envelope_from_parts(ciphertext: Vec<u8>, nonce: &[u8], tag: &[u8]) -> StorageResult<Envelope> {
    if nonce.len() != NONCE_SIZE {
        return Err(StorageError::Corrupt(format!(
            "nonce length {}",
            nonce.len()
        )));
    }
    if tag.len() != TAG_SIZE {
        return Err(StorageError::Corrupt(format!("tag length {}", tag.len())));
    }
    let mut nonce_arr = [0u8; NONCE_SIZE];
    nonce_arr.copy_from_slice(nonce);
    let mut tag_arr = [0u8; TAG_SIZE];
    tag_arr.copy_from_slice(tag);
    Ok(Envelope {
        ciphertext,
        nonce: nonce_arr,
        tag: tag_arr,
    })
}

fn initialize_envelope_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            tenant_id VARCHAR PRIMARY KEY,
            salt BLOB NOT NULL,
            dek_ciphertext BLOB NOT NULL,
            dek_nonce BLOB NOT NULL,
            dek_tag BLOB NOT NULL,
            created_at BIGINT NOT NULL,
            rewrapped_at BIGINT
        );
        CREATE TABLE IF NOT EXISTS encrypted_fields (
            entity_id VARCHAR NOT NULL,
            field_name VARCHAR NOT NULL,
            tenant_id VARCHAR NOT NULL,
            ciphertext BLOB NOT NULL,
            nonce BLOB NOT NULL,
            tag BLOB NOT NULL,
            modified_at BIGINT NOT NULL,
            PRIMARY KEY (entity_id, field_name)
        );
        CREATE INDEX IF NOT EXISTS idx_fields_tenant ON encrypted_fields(tenant_id);
        "#,
    )?;
    Ok(())
}
