//! sawtooth-cache - TTL cache with forced refresh.
//!
//! `get` is a lazy, re-validated-at-access cache; `force` unconditionally
//! reloads and, on failure, retains the previous entry. Concurrent loads for
//! the same name are coalesced via a per-key lock so a burst of misses for
//! one feature set triggers exactly one metadata read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sawtooth_core::{FetchError, ServingInfo};

/// Supplies `ServingInfo` on cache miss/force; backed by a read against the
/// metadata dataset, whose storage mechanics are out of scope
/// here.
#[async_trait]
pub trait MetadataLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<ServingInfo, FetchError>;
}

struct CacheEntry {
    info: Arc<ServingInfo>,
    loaded_at: Instant,
}

pub struct ServingInfoCache<L: MetadataLoader> {
    loader: L,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<L: MetadataLoader> ServingInfoCache<L> {
    pub fn new(loader: L, ttl: Duration) -> Self {
        Self {
            loader,
            ttl,
            entries: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn fresh_entry(&self, name: &str) -> Option<Arc<ServingInfo>> {
        let entries = self.entries.read();
        entries.get(name).and_then(|entry| {
            if entry.loaded_at.elapsed() < self.ttl {
                Some(entry.info.clone())
            } else {
                None
            }
        })
    }

    fn store(&self, name: &str, info: ServingInfo) -> Arc<ServingInfo> {
        let info = Arc::new(info);
        self.entries.write().insert(
            name.to_string(),
            CacheEntry {
                info: info.clone(),
                loaded_at: Instant::now(),
            },
        );
        info
    }

    /// Returns the current cached entry; loads synchronously on miss or
    /// expiry. Transient load failures are returned to the caller, not
    /// cached, so the very next call retries.
    pub async fn get(&self, name: &str) -> Result<Arc<ServingInfo>, FetchError> {
        if let Some(info) = self.fresh_entry(name) {
            metrics::counter!("sawtooth.cache.hits", 1);
            return Ok(info);
        }

        let lock = self.key_lock(name);
        let _guard = lock.lock().await;

        // Someone else may have populated it while we waited for the lock.
        if let Some(info) = self.fresh_entry(name) {
            metrics::counter!("sawtooth.cache.hits", 1);
            return Ok(info);
        }

        metrics::counter!("sawtooth.cache.misses", 1);
        self.loader.load(name).await.map(|info| self.store(name, info))
    }

    /// Unconditionally reloads from the metadata dataset. On failure the
    /// previous cached value (if any) is retained and the failure is
    /// surfaced to the caller, who decides whether to proceed with stale
    /// serving-info.
    pub async fn force(&self, name: &str) -> Result<Arc<ServingInfo>, FetchError> {
        metrics::counter!("sawtooth.cache.forced_refreshes", 1);
        let lock = self.key_lock(name);
        let _guard = lock.lock().await;

        match self.loader.load(name).await {
            Ok(info) => Ok(self.store(name, info)),
            Err(err) => {
                tracing::warn!(
                    feature_set = name,
                    error = %err,
                    "forced serving-info refresh failed, retaining stale entry"
                );
                Err(err)
            }
        }
    }
}
