//! Key namespacing for everything this workspace writes to the store.
//!
//! | purpose          | key                               |
//! |------------------|-----------------------------------|
//! | cached value     | `cache:<entity>:<id>`             |
//! | lock             | `lock:<name>`                     |
//! | id sequence      | `counter:<prefix>:<yyyy:MM:dd>`   |
//! | seckill state    | `seckill:<kind>:<voucher id>`     |

use std::fmt::Display;

pub const CACHE_PREFIX: &str = "cache";
pub const LOCK_PREFIX: &str = "lock";
pub const COUNTER_PREFIX: &str = "counter";

/// Cache and rebuild-lock keys for one entity kind, e.g. `shop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpace {
    entity: String,
}

impl KeySpace {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// `cache:<entity>:<id>`
    pub fn cache_key(&self, id: impl Display) -> String {
        format!("{CACHE_PREFIX}:{}:{id}", self.entity)
    }

    /// Lock name for rebuilding `id`; the lock key becomes `lock:<entity>:<id>`.
    pub fn lock_name(&self, id: impl Display) -> String {
        format!("{}:{id}", self.entity)
    }
}

pub fn lock_key(name: &str) -> String {
    format!("{LOCK_PREFIX}:{name}")
}

pub fn counter_key(prefix: &str, day: &str) -> String {
    format!("{COUNTER_PREFIX}:{prefix}:{day}")
}

pub mod seckill {
    use std::fmt::Display;

    pub fn stock_key(voucher_id: impl Display) -> String {
        format!("seckill:stock:{voucher_id}")
    }

    pub fn begin_key(voucher_id: impl Display) -> String {
        format!("seckill:begin:{voucher_id}")
    }

    pub fn end_key(voucher_id: impl Display) -> String {
        format!("seckill:end:{voucher_id}")
    }

    /// Set of user ids already admitted for a voucher.
    pub fn order_set_key(voucher_id: impl Display) -> String {
        format!("seckill:order:{voucher_id}")
    }

    /// Failed processing attempts of one queue entry.
    pub fn attempts_key(entry_id: &str) -> String {
        format!("seckill:attempts:{entry_id}")
    }
}
