//! Zero-knowledge vault facade.
//!
//! Ties the key hierarchy together for the API layer and content services:
//! tenant creation, session unlock/lock, field-level encryption, and the
//! audit trail. Nothing persisted by this crate can be turned back into
//! plaintext without a user passphrase, and every mutation is appended to
//! the tenant's tamper-evident chain before it is acknowledged.

mod error;

pub use error::{VaultError, VaultResult};

use mnemo_crypto::{
    derive_key, field_aad, generate_dek, open, seal, unwrap_dek, wrap_dek, Envelope, KdfParams,
    Salt, SymmetricKey,
};
use mnemo_keycache::{KeyCacheConfig, SessionKeyCache};
use mnemo_ledger::{AuditLedger, ChainStatus, EventPayload};
use mnemo_storage::EnvelopeStore;
use mnemo_types::{EntityId, SessionId, TenantId};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Vault-wide policy and tuning.
#[derive(Clone, Copy, Debug)]
pub struct VaultConfig {
    /// KDF cost profile, fixed per deployment.
    pub kdf_params: KdfParams,
    /// Minimum passphrase length, enforced when a passphrase is set
    /// (creation/rotation) — never at unlock, so a wrong short passphrase
    /// reads as `AuthFailure` rather than a policy error.
    pub min_passphrase_chars: usize,
    pub cache: KeyCacheConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_params: KdfParams::default(),
            min_passphrase_chars: 20,
            cache: KeyCacheConfig::default(),
        }
    }
}

/// Returned by [`KnowledgeVault::unlock`].
#[derive(Clone, Copy, Debug, Serialize)]
pub struct UnlockStatus {
    /// Seconds until the session's KEK expires.
    pub expires_in_secs: u64,
}

/// Returned by [`KnowledgeVault::status`].
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SessionStatus {
    pub unlocked: bool,
}

/// The vault facade. The session key cache is injected so tests and
/// embedders control its lifetime; the vault never owns global state.
pub struct KnowledgeVault {
    store: EnvelopeStore,
    ledger: AuditLedger,
    cache: Arc<SessionKeyCache>,
    config: VaultConfig,
}

impl KnowledgeVault {
    pub fn new(
        store: EnvelopeStore,
        ledger: AuditLedger,
        cache: Arc<SessionKeyCache>,
        config: VaultConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            cache,
            config,
        }
    }

    /// Opens a vault backed by a single DuckDB file at `path`.
    pub fn open(path: &Path, config: VaultConfig) -> VaultResult<Self> {
        let conn = Arc::new(Mutex::new(mnemo_storage::open_duckdb(path, "128MB", 1)?));
        let store = EnvelopeStore::with_connection(conn.clone())?;
        let ledger = AuditLedger::with_connection(conn)?;
        let cache = Arc::new(SessionKeyCache::new(config.cache));
        Ok(Self::new(store, ledger, cache, config))
    }

    /// Opens an in-memory vault (for testing).
    pub fn open_in_memory(config: VaultConfig) -> VaultResult<Self> {
        let conn = Arc::new(Mutex::new(duckdb::Connection::open_in_memory().map_err(
            mnemo_storage::StorageError::from,
        )?));
        let store = EnvelopeStore::with_connection(conn.clone())?;
        let ledger = AuditLedger::with_connection(conn)?;
        let cache = Arc::new(SessionKeyCache::new(config.cache));
        Ok(Self::new(store, ledger, cache, config))
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The injected key cache (shared with whoever constructed the vault).
    pub fn key_cache(&self) -> &Arc<SessionKeyCache> {
        &self.cache
    }

    // ========================================================================
    // Tenant lifecycle
    // ========================================================================

    /// Creates a tenant: fresh salt, fresh DEK wrapped under the
    /// passphrase-derived KEK, and a `tenant_created` audit event.
    pub async fn create_tenant(
        &self,
        tenant_id: &TenantId,
        passphrase: &str,
        actor: &str,
    ) -> VaultResult<()> {
        self.check_passphrase_policy(passphrase)?;

        let salt = Salt::random();
        let kek = self.derive_off_thread(passphrase, salt).await?;
        let dek = generate_dek();
        let wrapped = wrap_dek(&kek, &dek, tenant_id)?;

        self.store.create_tenant(tenant_id, &salt, &wrapped)?;
        self.ledger
            .append(tenant_id, "tenant_created", actor, EventPayload::TenantCreated)?;
        info!(tenant = %tenant_id, "tenant created");
        Ok(())
    }

    /// Rotates a tenant's passphrase: the DEK is re-wrapped under a new
    /// salt and KEK; content ciphertexts are untouched.
    pub async fn rotate_passphrase(
        &self,
        tenant_id: &TenantId,
        old_passphrase: &str,
        new_passphrase: &str,
        actor: &str,
    ) -> VaultResult<()> {
        self.check_passphrase_policy(new_passphrase)?;

        let old_salt = self.store.load_salt(tenant_id)?;
        let wrapped = self.store.load_wrapped_dek(tenant_id)?;

        let old_kek = self.derive_off_thread(old_passphrase, old_salt).await?;
        let dek = unwrap_dek(&old_kek, &wrapped, tenant_id)?;

        let new_salt = Salt::random();
        let new_kek = self.derive_off_thread(new_passphrase, new_salt).await?;
        let new_wrapped = wrap_dek(&new_kek, &dek, tenant_id)?;

        self.store
            .replace_tenant_keys(tenant_id, &new_salt, &new_wrapped)?;
        // Sessions unlocked under the old passphrase lose access now.
        self.cache.evict_tenant_dek(tenant_id).await;
        self.ledger.append(
            tenant_id,
            "passphrase_rotated",
            actor,
            EventPayload::PassphraseRotated,
        )?;
        info!(tenant = %tenant_id, "passphrase rotated");
        Ok(())
    }

    // ========================================================================
    // Session surface (API layer)
    // ========================================================================

    /// Unlocks a tenant for a session: derives the KEK (single-flight,
    /// off-thread) and proves the passphrase by unwrapping the stored DEK
    /// with it. Only a successful proof primes the DEK cache.
    pub async fn unlock(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        passphrase: &str,
    ) -> VaultResult<UnlockStatus> {
        let salt = self.store.load_salt(tenant_id)?;
        let wrapped = self.store.load_wrapped_dek(tenant_id)?;

        let kek = self
            .cache
            .get_or_derive_kek(session_id, passphrase, &salt, &self.config.kdf_params)
            .await?;

        // Verify against the stored envelope directly: a concurrently
        // cached DEK must never stand in for a passphrase check.
        match unwrap_dek(&kek, &wrapped, tenant_id) {
            Ok(_) => {}
            Err(err) => {
                self.cache.evict_session(session_id).await;
                debug!(tenant = %tenant_id, "unlock rejected");
                return Err(err.into());
            }
        }

        self.cache
            .get_or_unwrap_dek(session_id, tenant_id, &wrapped)
            .await?;

        Ok(UnlockStatus {
            expires_in_secs: self.config.cache.kek_ttl.as_secs(),
        })
    }

    pub async fn status(&self, session_id: &SessionId) -> SessionStatus {
        SessionStatus {
            unlocked: self.cache.is_unlocked(session_id).await,
        }
    }

    /// Drops the session's KEK. Idempotent.
    pub async fn lock(&self, session_id: &SessionId) {
        self.cache.evict_session(session_id).await;
    }

    /// Drops the tenant's cached DEK. Idempotent.
    pub async fn lock_tenant(&self, tenant_id: &TenantId) {
        self.cache.evict_tenant_dek(tenant_id).await;
    }

    // ========================================================================
    // Field surface (content services)
    // ========================================================================

    /// Encrypts a field under the tenant's cached DEK, bound to
    /// (tenant, entity, field). Requires an unlocked, unexpired DEK.
    pub async fn encrypt_field(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        field_name: &str,
        plaintext: &[u8],
    ) -> VaultResult<Envelope> {
        let dek = self.cache.dek(tenant_id).await?;
        Ok(seal(&dek, plaintext, &field_aad(tenant_id, entity_id, field_name))?)
    }

    /// Decrypts a field envelope under the tenant's cached DEK.
    pub async fn decrypt_field(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        field_name: &str,
        envelope: &Envelope,
    ) -> VaultResult<Vec<u8>> {
        let dek = self.cache.dek(tenant_id).await?;
        Ok(open(&dek, envelope, &field_aad(tenant_id, entity_id, field_name))?)
    }

    /// Encrypts, persists, and audits a field write. The mutation is only
    /// acknowledged once the audit event is durable.
    pub async fn put_field(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        field_name: &str,
        plaintext: &[u8],
        actor: &str,
    ) -> VaultResult<()> {
        let envelope = self
            .encrypt_field(tenant_id, entity_id, field_name, plaintext)
            .await?;
        self.store
            .store_field(tenant_id, entity_id, field_name, &envelope)?;
        self.ledger.append(
            tenant_id,
            "field_written",
            actor,
            EventPayload::FieldWritten {
                entity_id: *entity_id,
                field_name: field_name.to_string(),
            },
        )?;
        Ok(())
    }

    /// Loads and decrypts a stored field.
    pub async fn get_field(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        field_name: &str,
    ) -> VaultResult<Vec<u8>> {
        let envelope = self.store.load_field(entity_id, field_name)?;
        self.decrypt_field(tenant_id, entity_id, field_name, &envelope)
            .await
    }

    // ========================================================================
    // Audit surface
    // ========================================================================

    /// Appends an event to the tenant's audit chain.
    pub fn record_event(
        &self,
        tenant_id: &TenantId,
        event_type: &str,
        actor: &str,
        payload: EventPayload,
    ) -> VaultResult<mnemo_ledger::AuditEvent> {
        Ok(self.ledger.append(tenant_id, event_type, actor, payload)?)
    }

    /// Verifies the tenant's audit chain.
    pub fn verify_chain(&self, tenant_id: &TenantId) -> VaultResult<ChainStatus> {
        Ok(self.ledger.verify(tenant_id)?)
    }

    /// Reads the tenant's audit events in chain order.
    pub fn audit_events(&self, tenant_id: &TenantId) -> VaultResult<Vec<mnemo_ledger::AuditEvent>> {
        Ok(self.ledger.events(tenant_id)?)
    }

    /// Applies the retention policy: truncates the chain prefix through
    /// `through_seq` and records the purge.
    pub fn purge_audit_history(
        &self,
        tenant_id: &TenantId,
        actor: &str,
        through_seq: u64,
    ) -> VaultResult<mnemo_ledger::AuditEvent> {
        Ok(self.ledger.purge_through(tenant_id, actor, through_seq)?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_passphrase_policy(&self, passphrase: &str) -> VaultResult<()> {
        if passphrase.chars().count() < self.config.min_passphrase_chars {
            return Err(VaultError::PassphraseTooShort {
                min: self.config.min_passphrase_chars,
            });
        }
        Ok(())
    }

    /// Runs the memory-hard KDF on the blocking pool.
    async fn derive_off_thread(&self, passphrase: &str, salt: Salt) -> VaultResult<SymmetricKey> {
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let params = self.config.kdf_params;
        tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, &params))
            .await
            .map_err(|e| VaultError::Internal(e.to_string()))?
            .map_err(VaultError::from)
    }
}
