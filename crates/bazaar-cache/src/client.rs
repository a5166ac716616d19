use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bazaar_core::metrics::{record_cache_hit, record_cache_miss, record_cache_rebuild};
use bazaar_core::{KeySpace, SharedClock};
use bazaar_store::KeyValueStore;
use bazaar_sync::{DistributedLock, LockGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::CacheConfig;
use crate::envelope::LogicalExpiry;
use crate::error::{CacheError, CacheResult};
use crate::pool::RebuildPool;

/// What a cache key currently holds.
enum Cached<T> {
    /// No entry at all.
    Miss,
    /// The empty marker: the upstream record is known to be absent.
    Absent,
    Value(T),
}

/// Cache facade shared by all request handlers of an instance.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn KeyValueStore>,
    locks: DistributedLock,
    clock: SharedClock,
    pool: Arc<RebuildPool>,
    config: CacheConfig,
}

impl CacheClient {
    /// Creates the client and spawns its rebuild workers on the current runtime.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        locks: DistributedLock,
        clock: SharedClock,
        config: CacheConfig,
    ) -> Self {
        let pool = Arc::new(RebuildPool::new(
            config.rebuild_workers,
            config.rebuild_queue_capacity,
        ));
        Self {
            store,
            locks,
            clock,
            pool,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Writes `value` with a physical TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let bytes = encode(key, value)?;
        self.store.set(key, &bytes, Some(ttl)).await?;
        Ok(())
    }

    /// Writes `value` without a physical TTL, logically expiring `ttl` from now.
    /// Used to pre-warm hot keys served by [`query_with_logical_expire`](Self::query_with_logical_expire).
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        write_envelope(self.store.as_ref(), &self.clock, key, value, ttl).await
    }

    pub async fn invalidate(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.delete(key).await?)
    }

    /// Runs the upstream `write`, then deletes `key`. The key is left alone
    /// when the write fails.
    pub async fn update_then_invalidate<R, F, Fut>(&self, key: &str, write: F) -> CacheResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let result = write().await.map_err(CacheError::Loader)?;
        self.store.delete(key).await?;
        tracing::debug!(key, "cache invalidated after write");
        Ok(result)
    }

    /// Read-through with null markers.
    ///
    /// A confirmed-absent record is cached as an empty marker for
    /// `null_ttl`, so repeated lookups of a missing id stop reaching the
    /// loader.
    pub async fn query_with_pass_through<T, ID, F, Fut>(
        &self,
        space: &KeySpace,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let key = space.cache_key(&id);
        match self.read::<T>(&key).await? {
            Cached::Value(value) => return Ok(Some(value)),
            Cached::Absent => return Ok(None),
            Cached::Miss => {}
        }

        let loaded = loader(id).await.map_err(CacheError::Loader)?;
        self.store_loaded(&key, loaded.as_ref(), ttl).await?;
        Ok(loaded)
    }

    /// Read-through where a single caller rebuilds a missing key under a
    /// lock while the others wait and re-read.
    ///
    /// Waiters poll every `retry_delay` and give up with
    /// [`CacheError::LockTimeout`] after `max_attempts` reads.
    pub async fn query_with_mutex<T, ID, F, Fut>(
        &self,
        space: &KeySpace,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let key = space.cache_key(&id);
        let lock_name = space.lock_name(&id);
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.read::<T>(&key).await? {
                Cached::Value(value) => return Ok(Some(value)),
                Cached::Absent => return Ok(None),
                Cached::Miss => {}
            }

            if let Some(guard) = self.locks.try_lock(&lock_name, self.config.lock_ttl()).await? {
                let result = self.rebuild_locked(&key, id, loader, ttl).await;
                release(guard).await;
                return result;
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        tracing::warn!(key = %key, attempts, "mutex rebuild wait exhausted");
        Err(CacheError::LockTimeout { key, attempts })
    }

    async fn rebuild_locked<T, ID, F, Fut>(
        &self,
        key: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        // Another holder may have finished between our miss and our lock.
        match self.read::<T>(key).await? {
            Cached::Value(value) => return Ok(Some(value)),
            Cached::Absent => return Ok(None),
            Cached::Miss => {}
        }

        let loaded = loader(id).await.map_err(CacheError::Loader)?;
        self.store_loaded(key, loaded.as_ref(), ttl).await?;
        tracing::debug!(key, found = loaded.is_some(), "cache rebuilt under lock");
        Ok(loaded)
    }

    /// Serves pre-warmed hot keys without ever blocking on a rebuild.
    ///
    /// A missing key yields `None`. An expired value is returned as-is while
    /// one caller, holding the rebuild lock, refreshes it on the
    /// [`RebuildPool`].
    pub async fn query_with_logical_expire<T, ID, F, Fut>(
        &self,
        space: &KeySpace,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        ID: Display + Send + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let key = space.cache_key(&id);
        let Some(envelope) = self.read_envelope::<T>(&key).await? else {
            record_cache_miss();
            return Ok(None);
        };

        let now = self.clock.now_millis();
        if !envelope.is_expired(now) {
            record_cache_hit("value");
            return Ok(Some(envelope.data));
        }
        record_cache_hit("stale");

        let lock_name = space.lock_name(&id);
        let Some(guard) = self.locks.try_lock(&lock_name, self.config.lock_ttl()).await? else {
            return Ok(Some(envelope.data));
        };

        // Re-check: a rebuild may have landed since our first read.
        if let Some(current) = self.read_envelope::<T>(&key).await? {
            if !current.is_expired(self.clock.now_millis()) {
                release(guard).await;
                return Ok(Some(current.data));
            }
        }

        let Some(slot) = self.pool.try_reserve() else {
            tracing::warn!(key = %key, "rebuild queue full, serving stale value");
            record_cache_rebuild("skipped");
            release(guard).await;
            return Ok(Some(envelope.data));
        };

        let store = self.store.clone();
        let clock = self.clock.clone();
        let rebuild_key = key.clone();
        slot.submit(async move {
            match loader(id).await {
                Ok(Some(value)) => {
                    match write_envelope(store.as_ref(), &clock, &rebuild_key, &value, ttl).await {
                        Ok(()) => {
                            record_cache_rebuild("success");
                            tracing::debug!(key = %rebuild_key, "logical-expiry entry rebuilt");
                        }
                        Err(e) => {
                            record_cache_rebuild("failed");
                            tracing::error!(key = %rebuild_key, error = %e, "rebuild write failed");
                        }
                    }
                }
                Ok(None) => {
                    if let Err(e) = store.delete(&rebuild_key).await {
                        tracing::error!(key = %rebuild_key, error = %e, "rebuild delete failed");
                    }
                    record_cache_rebuild("removed");
                }
                Err(e) => {
                    record_cache_rebuild("failed");
                    tracing::error!(key = %rebuild_key, error = %e, "cache rebuild failed");
                }
            }
            release(guard).await;
        });

        Ok(Some(envelope.data))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Cached<T>> {
        match self.store.get(key).await? {
            None => {
                record_cache_miss();
                Ok(Cached::Miss)
            }
            Some(bytes) if bytes.is_empty() => {
                record_cache_hit("null");
                Ok(Cached::Absent)
            }
            Some(bytes) => {
                record_cache_hit("value");
                decode(key, &bytes).map(Cached::Value)
            }
        }
    }

    async fn read_envelope<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> CacheResult<Option<LogicalExpiry<T>>> {
        match self.store.get(key).await? {
            Some(bytes) if !bytes.is_empty() => decode(key, &bytes).map(Some),
            _ => Ok(None),
        }
    }

    /// Writes a loaded value, or the empty marker when it is absent.
    async fn store_loaded<T: Serialize>(
        &self,
        key: &str,
        loaded: Option<&T>,
        ttl: Duration,
    ) -> CacheResult<()> {
        match loaded {
            Some(value) => self.set(key, value, ttl).await,
            None => {
                self.store.set(key, &[], Some(self.config.null_ttl())).await?;
                tracing::debug!(key, "cached absent record");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

async fn write_envelope<T: Serialize>(
    store: &dyn KeyValueStore,
    clock: &SharedClock,
    key: &str,
    value: &T,
    ttl: Duration,
) -> CacheResult<()> {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expire_at = clock.now_millis().saturating_add(ttl_ms);
    let bytes = encode(key, &LogicalExpiry::new(value, expire_at))?;
    store.set(key, &bytes, None).await?;
    Ok(())
}

async fn release(guard: LockGuard) {
    let name = guard.name().to_string();
    if let Err(e) = guard.release().await {
        tracing::warn!(lock = %name, error = %e, "failed to release rebuild lock");
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> CacheResult<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::serialization(key, e))
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> CacheResult<T> {
    rmp_serde::from_slice(bytes).map_err(|e| CacheError::serialization(key, e))
}
