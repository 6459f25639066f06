//! Session key cache: short-lived KEK and DEK material.
//!
//! Holds derived KEKs per session and unwrapped DEKs per tenant, each with
//! its own TTL. The DEK window is much shorter than the KEK window so that
//! plaintext data keys spend as little time in memory as possible even
//! inside an active session.
//!
//! Concurrent requests for the same key collapse into a single derivation
//! ("single-flight"): a per-key mutex admits one deriver while the rest
//! wait, then re-check the cache. Argon2id is memory-hard, so derivations
//! run on the blocking pool behind a bounding semaphore.
//!
//! The cache is an explicit, injectable component. It owns nothing but
//! `id -> key material`; tenant and session records never pass through it.

mod error;

pub use error::{KeyCacheError, KeyCacheResult};

use mnemo_crypto::{derive_key, unwrap_dek, Envelope, KdfParams, Salt, SymmetricKey};
use mnemo_types::{SessionId, TenantId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Tuning for the session key cache.
#[derive(Clone, Copy, Debug)]
pub struct KeyCacheConfig {
    /// How long a derived KEK stays usable. Bounds the session duration.
    pub kek_ttl: Duration,

    /// How long an unwrapped DEK stays usable. Kept short to minimize
    /// plaintext data-key exposure within a session.
    pub dek_ttl: Duration,

    /// When true, a live DEK read extends its deadline by `dek_ttl`.
    /// When false (default) the deadline is fixed from unwrap time.
    pub refresh_dek_on_access: bool,

    /// Upper bound on concurrent Argon2id derivations. Each derivation
    /// pins `memory_kib` of RAM for its duration.
    pub max_concurrent_derivations: usize,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            kek_ttl: Duration::from_secs(60 * 60),
            dek_ttl: Duration::from_secs(5 * 60),
            refresh_dek_on_access: false,
            max_concurrent_derivations: 2,
        }
    }
}

/// Invocation counters, readable at any time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyCacheMetrics {
    /// Completed-or-started Argon2id derivations.
    pub kdf_invocations: u64,
    /// DEK unwrap (AEAD open) attempts.
    pub unwrap_invocations: u64,
}

struct CachedKey {
    key: SymmetricKey,
    expires_at: Instant,
}

/// In-memory cache of session KEKs and tenant DEKs.
pub struct SessionKeyCache {
    config: KeyCacheConfig,
    keks: RwLock<HashMap<SessionId, CachedKey>>,
    deks: RwLock<HashMap<TenantId, CachedKey>>,
    kek_flights: StdMutex<HashMap<SessionId, Arc<Mutex<()>>>>,
    dek_flights: StdMutex<HashMap<TenantId, Arc<Mutex<()>>>>,
    derive_permits: Semaphore,
    kdf_invocations: AtomicU64,
    unwrap_invocations: AtomicU64,
}

impl SessionKeyCache {
    pub fn new(config: KeyCacheConfig) -> Self {
        Self {
            derive_permits: Semaphore::new(config.max_concurrent_derivations),
            config,
            keks: RwLock::new(HashMap::new()),
            deks: RwLock::new(HashMap::new()),
            kek_flights: StdMutex::new(HashMap::new()),
            dek_flights: StdMutex::new(HashMap::new()),
            kdf_invocations: AtomicU64::new(0),
            unwrap_invocations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &KeyCacheConfig {
        &self.config
    }

    /// Returns the session's KEK, deriving it if absent or expired.
    ///
    /// Concurrent calls for the same session collapse into one Argon2id
    /// invocation; every caller receives the identical key. The derivation
    /// runs on the blocking pool behind the derivation semaphore. Callers
    /// needing a bound on latency wrap this future in `tokio::time::timeout`;
    /// a dropped call never inserts key material.
    pub async fn get_or_derive_kek(
        &self,
        session_id: &SessionId,
        passphrase: &str,
        salt: &Salt,
        params: &KdfParams,
    ) -> KeyCacheResult<SymmetricKey> {
        if let Some(kek) = self.live_kek(session_id).await {
            return Ok(kek);
        }

        let flight = self.kek_flight(session_id);
        let _guard = flight.lock().await;

        // Another caller may have finished deriving while we waited.
        if let Some(kek) = self.live_kek(session_id).await {
            return Ok(kek);
        }

        let _permit = self
            .derive_permits
            .acquire()
            .await
            .expect("derivation semaphore never closed");

        self.kdf_invocations.fetch_add(1, Ordering::Relaxed);
        debug!(session = %session_id, "deriving KEK");

        let passphrase = zeroize::Zeroizing::new(passphrase.to_owned());
        let salt = *salt;
        let params = *params;
        let kek = tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, &params))
            .await
            .map_err(|e| KeyCacheError::Internal(e.to_string()))??;

        let mut keks = self.keks.write().await;
        keks.insert(
            session_id.clone(),
            CachedKey {
                key: kek.clone(),
                expires_at: Instant::now() + self.config.kek_ttl,
            },
        );
        Ok(kek)
    }

    /// Returns the tenant's DEK, unwrapping `wrapped` with the session's
    /// KEK if absent or expired.
    ///
    /// Concurrent calls for the same tenant collapse into one unwrap. An
    /// expired session KEK surfaces as `SessionExpired`; a failed unwrap
    /// surfaces as `AuthFailure` and caches nothing.
    pub async fn get_or_unwrap_dek(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        wrapped: &Envelope,
    ) -> KeyCacheResult<SymmetricKey> {
        if let Some(dek) = self.live_dek(tenant_id).await {
            return Ok(dek);
        }

        let flight = self.dek_flight(tenant_id);
        let _guard = flight.lock().await;

        if let Some(dek) = self.live_dek(tenant_id).await {
            return Ok(dek);
        }

        let kek = self.kek(session_id).await?;

        self.unwrap_invocations.fetch_add(1, Ordering::Relaxed);
        debug!(tenant = %tenant_id, "unwrapping DEK");
        let dek = unwrap_dek(&kek, wrapped, tenant_id)?;

        let mut deks = self.deks.write().await;
        deks.insert(
            *tenant_id,
            CachedKey {
                key: dek.clone(),
                expires_at: Instant::now() + self.config.dek_ttl,
            },
        );
        Ok(dek)
    }

    /// Cached-only KEK lookup. Expired and absent entries are
    /// indistinguishable: both yield `SessionExpired`, exactly as if the
    /// session had been evicted.
    pub async fn kek(&self, session_id: &SessionId) -> KeyCacheResult<SymmetricKey> {
        self.live_kek(session_id)
            .await
            .ok_or(KeyCacheError::SessionExpired)
    }

    /// Cached-only DEK lookup with the same expiry semantics as [`kek`].
    ///
    /// [`kek`]: SessionKeyCache::kek
    pub async fn dek(&self, tenant_id: &TenantId) -> KeyCacheResult<SymmetricKey> {
        self.live_dek(tenant_id)
            .await
            .ok_or(KeyCacheError::SessionExpired)
    }

    /// Whether the session currently holds a live KEK.
    pub async fn is_unlocked(&self, session_id: &SessionId) -> bool {
        self.live_kek(session_id).await.is_some()
    }

    /// Drops the session's KEK. Idempotent; immediately visible to all
    /// subsequent lookups.
    pub async fn evict_session(&self, session_id: &SessionId) {
        self.keks.write().await.remove(session_id);
        self.kek_flights
            .lock()
            .expect("flight map lock poisoned")
            .remove(session_id);
        debug!(session = %session_id, "session KEK evicted");
    }

    /// Drops the tenant's DEK. Idempotent; immediately visible.
    pub async fn evict_tenant_dek(&self, tenant_id: &TenantId) {
        self.deks.write().await.remove(tenant_id);
        self.dek_flights
            .lock()
            .expect("flight map lock poisoned")
            .remove(tenant_id);
        debug!(tenant = %tenant_id, "tenant DEK evicted");
    }

    /// Drops all cached key material (process-wide lock).
    pub async fn evict_all(&self) {
        self.keks.write().await.clear();
        self.deks.write().await.clear();
        self.kek_flights
            .lock()
            .expect("flight map lock poisoned")
            .clear();
        self.dek_flights
            .lock()
            .expect("flight map lock poisoned")
            .clear();
    }

    pub fn metrics(&self) -> KeyCacheMetrics {
        KeyCacheMetrics {
            kdf_invocations: self.kdf_invocations.load(Ordering::Relaxed),
            unwrap_invocations: self.unwrap_invocations.load(Ordering::Relaxed),
        }
    }

    async fn live_kek(&self, session_id: &SessionId) -> Option<SymmetricKey> {
        let now = Instant::now();
        {
            let keks = self.keks.read().await;
            match keks.get(session_id) {
                Some(entry) if now < entry.expires_at => return Some(entry.key.clone()),
                Some(_) => {} // expired — purge below
                None => return None,
            }
        }
        let mut keks = self.keks.write().await;
        if keks
            .get(session_id)
            .is_some_and(|entry| now >= entry.expires_at)
        {
            keks.remove(session_id);
        }
        keks.get(session_id)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.key.clone())
    }

    async fn live_dek(&self, tenant_id: &TenantId) -> Option<SymmetricKey> {
        let now = Instant::now();

        if self.config.refresh_dek_on_access {
            let mut deks = self.deks.write().await;
            return match deks.get_mut(tenant_id) {
                Some(entry) if now < entry.expires_at => {
                    entry.expires_at = now + self.config.dek_ttl;
                    Some(entry.key.clone())
                }
                Some(_) => {
                    deks.remove(tenant_id);
                    None
                }
                None => None,
            };
        }

        {
            let deks = self.deks.read().await;
            match deks.get(tenant_id) {
                Some(entry) if now < entry.expires_at => return Some(entry.key.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut deks = self.deks.write().await;
        if deks
            .get(tenant_id)
            .is_some_and(|entry| now >= entry.expires_at)
        {
            deks.remove(tenant_id);
        }
        deks.get(tenant_id)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.key.clone())
    }

    fn kek_flight(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.kek_flights
            .lock()
            .expect("flight map lock poisoned")
            .entry(session_id.clone())
            .or_default()
            .clone()
    }

    fn dek_flight(&self, tenant_id: &TenantId) -> Arc<Mutex<()>> {
        self.dek_flights
            .lock()
            .expect("flight map lock poisoned")
            .entry(*tenant_id)
            .or_default()
            .clone()
    }
}
