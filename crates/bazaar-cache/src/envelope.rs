use serde::{Deserialize, Serialize};

/// Value stored without a physical TTL, carrying its own expiry instant.
///
/// A reader that finds `expire_at` in the past still serves `data` and
/// schedules a rebuild in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalExpiry<T> {
    pub data: T,
    /// Epoch milliseconds.
    pub expire_at: i64,
}

impl<T> LogicalExpiry<T> {
    pub fn new(data: T, expire_at: i64) -> Self {
        Self { data, expire_at }
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expire_at <= now_millis
    }
}
