//! Owner-token distributed locks.
//!
//! A lock is the key `lock:<name>` holding the owner's token with a physical
//! TTL. Acquisition is a single set-if-absent; release and renewal are atomic
//! compare-then-act procedures, so a holder whose lock has expired and been
//! taken over can never delete or extend the new owner's entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bazaar_core::lock_key;
use bazaar_core::metrics::record_lock_acquisition;
use bazaar_store::procedure::{arg_at, key_at};
use bazaar_store::{KeyValueStore, MemoryState, Procedure, ScriptValue, StoreError, StoreResult};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const UNLOCK: Procedure = Procedure::new(
    "lock_unlock",
    r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
end
return 0
"#,
    unlock_native,
);

const RENEW: Procedure = Procedure::new(
    "lock_renew",
    r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
end
return 0
"#,
    renew_native,
);

fn unlock_native(
    state: &mut MemoryState,
    keys: &[String],
    args: &[String],
) -> StoreResult<ScriptValue> {
    let key = key_at(UNLOCK.name(), keys, 0)?;
    let token = arg_at(UNLOCK.name(), args, 0)?;
    if state.get(key)?.as_deref() == Some(token.as_bytes()) {
        return Ok(ScriptValue::Int(i64::from(state.delete(key))));
    }
    Ok(ScriptValue::Int(0))
}

fn renew_native(
    state: &mut MemoryState,
    keys: &[String],
    args: &[String],
) -> StoreResult<ScriptValue> {
    let key = key_at(RENEW.name(), keys, 0)?;
    let token = arg_at(RENEW.name(), args, 0)?;
    let millis: u64 = arg_at(RENEW.name(), args, 1)?
        .parse()
        .map_err(|_| StoreError::script(RENEW.name(), "ARGV[2] must be milliseconds"))?;
    if state.get(key)?.as_deref() == Some(token.as_bytes()) {
        let renewed = state.pexpire(key, Duration::from_millis(millis));
        return Ok(ScriptValue::Int(i64::from(renewed)));
    }
    Ok(ScriptValue::Int(0))
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fixed-delay bounded retry for [`DistributedLock::lock_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(20, Duration::from_millis(50))
    }
}

/// Lock manager for one process.
///
/// Cheap to clone; clones share the instance id and acquisition sequence, so
/// every token handed out by a process is distinct.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    instance: Arc<str>,
    sequence: Arc<AtomicU64>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_instance_id(store, default_instance_id())
    }

    pub fn with_instance_id(store: Arc<dyn KeyValueStore>, instance: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            instance: instance.into(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    fn next_token(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}:{}", self.instance, seq)
    }

    /// Single non-blocking acquisition attempt.
    pub async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let token = self.next_token();
        let acquired = self
            .store
            .set_if_absent(&lock_key(name), token.as_bytes(), ttl)
            .await?;
        record_lock_acquisition(acquired);

        if !acquired {
            tracing::trace!(lock = name, "lock held by another owner");
            return Ok(None);
        }
        tracing::trace!(lock = name, token = %token, ttl_ms = ttl.as_millis() as u64, "lock acquired");
        Ok(Some(LockGuard {
            lock: self.clone(),
            name: name.to_string(),
            token,
            ttl,
            released: false,
            watchdog: None,
        }))
    }

    /// Retries [`try_lock`](Self::try_lock) up to `policy.max_attempts` times,
    /// sleeping `policy.delay` between attempts.
    pub async fn lock_with_retry(
        &self,
        name: &str,
        ttl: Duration,
        policy: RetryPolicy,
    ) -> Result<Option<LockGuard>, LockError> {
        for attempt in 1..=policy.max_attempts.max(1) {
            if let Some(guard) = self.try_lock(name, ttl).await? {
                return Ok(Some(guard));
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }
        tracing::debug!(lock = name, attempts = policy.max_attempts, "gave up waiting for lock");
        Ok(None)
    }

    /// Deletes the lock only if it still holds `token`.
    pub async fn unlock(&self, name: &str, token: &str) -> Result<bool, LockError> {
        let reply = self
            .store
            .eval(&UNLOCK, &[lock_key(name)], &[token.to_string()])
            .await?;
        let released = reply.into_int(UNLOCK.name())? == 1;
        if !released {
            tracing::debug!(lock = name, "unlock skipped, token no longer owns the lock");
        }
        Ok(released)
    }

    /// Extends the TTL only if the lock still holds `token`.
    pub async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply = self
            .store
            .eval(
                &RENEW,
                &[lock_key(name)],
                &[token.to_string(), millis.to_string()],
            )
            .await?;
        Ok(reply.into_int(RENEW.name())? == 1)
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("instance", &self.instance)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

fn default_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{host}-{}", uuid::Uuid::new_v4())
}

/// A held lock.
///
/// Call [`release`](Self::release) when done. A guard dropped without release
/// schedules the unlock on the current tokio runtime; outside a runtime the
/// lock is left to expire.
#[derive(Debug)]
pub struct LockGuard {
    lock: DistributedLock,
    name: String,
    token: String,
    ttl: Duration,
    released: bool,
    watchdog: Option<CancellationToken>,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Keeps the lock alive by renewing it every `ttl / 3` until the guard is
    /// released or ownership is lost.
    #[must_use]
    pub fn with_watchdog(mut self) -> Self {
        if self.watchdog.is_some() {
            return self;
        }
        let cancel = CancellationToken::new();
        let lock = self.lock.clone();
        let name = self.name.clone();
        let token = self.token.clone();
        let ttl = self.ttl;
        let period = (ttl / 3).max(Duration::from_millis(1));
        let stop = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                match lock.renew(&name, &token, ttl).await {
                    Ok(true) => tracing::trace!(lock = %name, "lock renewed"),
                    Ok(false) => {
                        tracing::warn!(lock = %name, "watchdog lost lock ownership");
                        break;
                    }
                    Err(e) => tracing::warn!(lock = %name, error = %e, "lock renewal failed"),
                }
            }
        });

        self.watchdog = Some(cancel);
        self
    }

    /// Releases the lock. Returns `false` if it had already expired or
    /// passed to another owner.
    pub async fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.cancel();
        }
        self.lock.unlock(&self.name, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.cancel();
        }
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock = %self.name, "lock guard dropped outside a runtime, leaving it to expire");
            return;
        };
        let lock = self.lock.clone();
        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = lock.unlock(&name, &token).await {
                tracing::warn!(lock = %name, error = %e, "deferred unlock failed");
            }
        });
    }
}
