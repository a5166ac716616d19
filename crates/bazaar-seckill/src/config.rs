use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Flash-sale queue settings, the `[seckill]` section of the service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeckillConfig {
    /// Durable stream admissions are appended to.
    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(default = "default_group")]
    pub group: String,

    /// Consumer name of this instance; defaults to `consumer-<hostname>`.
    #[serde(default)]
    pub consumer: Option<String>,

    /// Stream receiving entries that exhausted their attempts.
    #[serde(default = "default_dead_letter_stream")]
    pub dead_letter_stream: String,

    /// Bound on a blocking read of new entries.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// TTL of the per-user order lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Failed processing attempts before an entry is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Pending entries fetched per recovery round.
    #[serde(default = "default_pending_batch")]
    pub pending_batch: usize,
}

fn default_stream() -> String {
    "stream.orders".to_string()
}

fn default_group() -> String {
    "g1".to_string()
}

fn default_dead_letter_stream() -> String {
    "stream.orders.dlq".to_string()
}

fn default_block_ms() -> u64 {
    2000
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_pending_batch() -> usize {
    10
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            stream: default_stream(),
            group: default_group(),
            consumer: None,
            dead_letter_stream: default_dead_letter_stream(),
            block_ms: default_block_ms(),
            lock_ttl_secs: default_lock_ttl_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            pending_batch: default_pending_batch(),
        }
    }
}

impl SeckillConfig {
    pub fn consumer_name(&self) -> String {
        match &self.consumer {
            Some(name) => name.clone(),
            None => {
                let host = hostname::get()
                    .ok()
                    .and_then(|name| name.into_string().ok())
                    .unwrap_or_else(|| "localhost".to_string());
                format!("consumer-{host}")
            }
        }
    }

    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.stream.is_empty() || self.group.is_empty() {
            return Err("seckill.stream and seckill.group must not be empty".into());
        }
        if self.dead_letter_stream == self.stream {
            return Err("seckill.dead_letter_stream must differ from seckill.stream".into());
        }
        if self.consumer.as_deref().is_some_and(str::is_empty) {
            return Err("seckill.consumer must not be empty".into());
        }
        if self.max_attempts == 0 {
            return Err("seckill.max_attempts must be > 0".into());
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err("seckill backoff requires 0 < backoff_base_ms <= backoff_max_ms".into());
        }
        if self.pending_batch == 0 {
            return Err("seckill.pending_batch must be > 0".into());
        }
        Ok(())
    }
}
