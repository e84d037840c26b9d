//! Response cache: TTL-bounded GET responses with in-flight coalescing and a
//! best-effort durable mirror.
//!
//! Lookup order for `get`:
//! 1. fresh in-memory entry
//! 2. fresh mirrored entry (promoted into memory)
//! 3. an in-flight fetch for the same key (shared result)
//! 4. a new fetch, whose success is written to memory and the mirror
//!
//! An entry is never served at or past its `expires_at`. Failed and aborted fetches
//! write nothing. Locks are never held across an await point.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::error::ClientError;
use crate::storage::DurableStore;

pub const DEFAULT_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Storage key prefix for mirrored entries.
pub const MIRROR_PREFIX: &str = "sectorpulse.cache.";
const MIRROR_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Mirror entries into durable storage.
    pub mirror: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            mirror: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    #[error("request aborted")]
    Aborted,

    #[error(transparent)]
    Fetch(#[from] ClientError),
}

impl From<CacheError> for ClientError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Aborted => ClientError::Aborted,
            CacheError::Fetch(inner) => inner,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub mirror_hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Value,
    expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MirrorRecord {
    version: u32,
    key: String,
    expires_at: i64,
    value: Value,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value, CacheError>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
    abort: AbortHandle,
}

struct Inner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    mirror: Option<Arc<dyn DurableStore>>,
    entries: Mutex<HashMap<String, Entry>>,
    inflight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
    stats: Mutex<CacheStats>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl ResponseCache {
    pub fn new(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        mirror: Option<Arc<dyn DurableStore>>,
    ) -> Self {
        let mirror = if config.mirror { mirror } else { None };
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                mirror,
                entries: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stats: Mutex::new(CacheStats::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.inner.config.ttl_secs)
    }

    /// Cached read. `fetcher` runs only when no fresh entry exists and no fetch for
    /// `key` is already in flight.
    pub async fn get<F, Fut>(&self, key: &str, fetcher: F) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, ClientError>> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup(key) {
            return Ok(value);
        }
        let fetch = self.join_or_start(key, fetcher);
        fetch.await
    }

    /// No-cache read: runs `fetcher` directly and leaves the cache untouched.
    pub async fn get_fresh<F, Fut>(&self, key: &str, fetcher: F) -> Result<Value, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ClientError>>,
    {
        tracing::debug!(key, "cache bypass");
        fetcher().await
    }

    /// Fresh entry for `key`, if any. Never fetches.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.inner.lookup(key)
    }

    /// Drop `key` from memory and the mirror.
    pub fn invalidate(&self, key: &str) {
        self.inner.entries.lock().remove(key);
        self.inner.remove_mirrored(key);
    }

    /// Drop every key starting with `prefix`. Returns the number of memory entries removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = {
            let mut entries = self.inner.entries.lock();
            let before = entries.len();
            entries.retain(|k, _| !k.starts_with(prefix));
            before - entries.len()
        };
        if let Some(mirror) = &self.inner.mirror {
            match mirror.keys(&mirror_key(prefix)) {
                Ok(keys) => {
                    for k in keys {
                        if let Err(e) = mirror.remove(&k) {
                            tracing::warn!(key = %k, error = %e, "cache mirror remove failed");
                        }
                    }
                }
                Err(e) => tracing::warn!(prefix, error = %e, "cache mirror scan failed"),
            }
        }
        tracing::debug!(prefix, removed, "cache invalidated by prefix");
        removed
    }

    /// Cancel the in-flight fetch for `key`. Its waiters receive `CacheError::Aborted`.
    pub fn abort(&self, key: &str) -> bool {
        let flight = self.inner.inflight.lock().remove(key);
        match flight {
            Some(f) => {
                f.abort.abort();
                tracing::debug!(key, "cache fetch aborted");
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.inflight.lock().contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = *self.inner.stats.lock();
        stats.entries = self.inner.entries.lock().len();
        stats
    }

    /// Drop every memory entry and every mirrored entry.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
        self.invalidate_prefix("");
    }

    fn join_or_start<F, Fut>(&self, key: &str, fetcher: F) -> SharedFetch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, ClientError>> + Send + 'static,
    {
        let mut inflight = self.inner.inflight.lock();
        if let Some(existing) = inflight.get(key) {
            self.inner.stats.lock().coalesced += 1;
            tracing::debug!(key, "cache coalesced");
            return existing.fetch.clone();
        }
        // A fetch may have completed since the lookup missed
        if let Some(value) = self.inner.fresh_entry(key) {
            tracing::debug!(key, "cache hit after completed fetch");
            return futures::future::ready(Ok(value)).boxed().shared();
        }

        self.inner.stats.lock().misses += 1;
        tracing::debug!(key, "cache miss");

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (abort, registration) = AbortHandle::new_pair();
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();

        let fetch = async move {
            let outcome = Abortable::new(async move { fetcher().await }, registration).await;
            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CacheError::Fetch(e)),
                Err(_) => Err(CacheError::Aborted),
            };
            inner.finish(&owned_key, id, &result);
            result
        }
        .boxed()
        .shared();

        inflight.insert(
            key.to_string(),
            InFlight {
                id,
                fetch: fetch.clone(),
                abort,
            },
        );
        fetch
    }
}

impl Inner {
    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.config.ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    self.stats.lock().hits += 1;
                    tracing::debug!(key, "cache hit");
                    return Some(entry.payload.clone());
                }
                Some(_) => {
                    entries.remove(key);
                }
                None => {}
            }
        }

        let record = self.read_mirrored(key, now)?;
        self.stats.lock().mirror_hits += 1;
        tracing::debug!(key, "cache mirror hit");
        self.insert(key, record.value.clone(), record.expires_at);
        Some(record.value)
    }

    /// Store the outcome, then retire the in-flight record. A caller that finds no
    /// in-flight record is guaranteed to see the stored entry.
    fn finish(&self, key: &str, id: u64, result: &Result<Value, CacheError>) {
        match result {
            Ok(value) => {
                let expires_at = self.clock.now_millis().saturating_add(self.ttl_millis());
                self.insert(key, value.clone(), expires_at);
                self.write_mirrored(key, value, expires_at);
            }
            Err(CacheError::Aborted) => {}
            Err(CacheError::Fetch(e)) => tracing::debug!(key, error = %e, "cache fetch failed"),
        }
        let mut inflight = self.inflight.lock();
        if inflight.get(key).is_some_and(|f| f.id == id) {
            inflight.remove(key);
        }
    }

    /// Fresh in-memory entry only; no mirror read, no eviction.
    fn fresh_entry(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let value = self
            .entries
            .lock()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.payload.clone())?;
        self.stats.lock().hits += 1;
        Some(value)
    }

    fn insert(&self, key: &str, payload: Value, expires_at: i64) {
        let now = self.clock.now_millis();
        let mut evicted = 0u64;
        {
            let mut entries = self.entries.lock();
            entries.insert(key.to_string(), Entry { payload, expires_at });

            if entries.len() > self.config.max_entries {
                let before = entries.len();
                entries.retain(|_, e| e.expires_at > now);
                evicted += (before - entries.len()) as u64;
            }
            while entries.len() > self.config.max_entries {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                match soonest {
                    Some(k) => {
                        entries.remove(&k);
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }
        if evicted > 0 {
            self.stats.lock().evictions += evicted;
        }
    }

    fn read_mirrored(&self, key: &str, now: i64) -> Option<MirrorRecord> {
        let mirror = self.mirror.as_ref()?;
        let raw = match mirror.get(&mirror_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache mirror read failed");
                return None;
            }
        };
        match serde_json::from_str::<MirrorRecord>(&raw) {
            Ok(record)
                if record.version == MIRROR_VERSION
                    && record.key == key
                    && record.expires_at > now =>
            {
                Some(record)
            }
            Ok(_) => {
                self.remove_mirrored(key);
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable cache mirror entry");
                self.remove_mirrored(key);
                None
            }
        }
    }

    fn write_mirrored(&self, key: &str, value: &Value, expires_at: i64) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let record = MirrorRecord {
            version: MIRROR_VERSION,
            key: key.to_string(),
            expires_at,
            value: value.clone(),
        };
        let written = serde_json::to_string(&record)
            .map_err(|e| e.to_string())
            .and_then(|json| mirror.set(&mirror_key(key), &json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            tracing::warn!(key, error = %e, "cache mirror write failed");
        }
    }

    fn remove_mirrored(&self, key: &str) {
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.remove(&mirror_key(key)) {
                tracing::warn!(key, error = %e, "cache mirror remove failed");
            }
        }
    }
}

fn mirror_key(key: &str) -> String {
    format!("{MIRROR_PREFIX}{key}")
}

// ─── Tests ───────────────────────────────────────────────────────────
