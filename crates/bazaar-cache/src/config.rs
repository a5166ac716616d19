use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cache tuning, the `[cache]` section of the service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL of the empty marker written for confirmed-absent records.
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,

    /// TTL of rebuild locks.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Pause between attempts of a reader waiting on a mutex rebuild.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Reads a waiting reader makes before giving up with `LockTimeout`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Worker tasks draining logical-expiration rebuilds.
    #[serde(default = "default_rebuild_workers")]
    pub rebuild_workers: usize,

    /// Rebuilds that may wait for a worker before new ones are skipped.
    #[serde(default = "default_rebuild_queue_capacity")]
    pub rebuild_queue_capacity: usize,
}

fn default_null_ttl_secs() -> u64 {
    120
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    50
}

fn default_max_attempts() -> u32 {
    100
}

fn default_rebuild_workers() -> usize {
    10
}

fn default_rebuild_queue_capacity() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            null_ttl_secs: default_null_ttl_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            max_attempts: default_max_attempts(),
            rebuild_workers: default_rebuild_workers(),
            rebuild_queue_capacity: default_rebuild_queue_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.null_ttl_secs == 0 {
            return Err("cache.null_ttl_secs must be > 0".into());
        }
        if self.lock_ttl_secs == 0 {
            return Err("cache.lock_ttl_secs must be > 0".into());
        }
        if self.max_attempts == 0 {
            return Err("cache.max_attempts must be > 0".into());
        }
        if self.rebuild_workers == 0 {
            return Err("cache.rebuild_workers must be > 0".into());
        }
        if self.rebuild_queue_capacity == 0 {
            return Err("cache.rebuild_queue_capacity must be > 0".into());
        }
        Ok(())
    }
}
