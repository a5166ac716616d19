//! The key/value store contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::procedure::{Procedure, ScriptValue};
use crate::stream::{ReadCursor, StreamEntry, StreamFields};

/// Remote in-memory key/value store with TTLs, atomic counters, atomic
/// procedures and consumer-group streams.
///
/// Every method is a single round-trip. Composite check-then-act logic must go
/// through [`KeyValueStore::eval`] so it runs as one indivisible operation on
/// the store. Implementations must be thread-safe (`Send + Sync`).
///
/// # Errors
///
/// Every method returns `StoreError::Unavailable` when the store cannot be
/// reached. Callers must not interpret that as an absent key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    // ==================== Values ====================

    /// Reads a value. Returns `None` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes a value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Writes a value only if the key does not exist. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool>;

    /// Deletes a key. Returns whether something was deleted.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increments an integer counter, creating it at 0 first.
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    // ==================== Procedures ====================

    /// Runs an atomic procedure with the given `KEYS` and `ARGV`.
    async fn eval(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptValue>;

    // ==================== Streams ====================

    /// Creates a consumer group reading the stream from its beginning,
    /// creating the stream if needed. Returns `false` if the group already existed.
    async fn stream_create_group(&self, stream: &str, group: &str) -> StoreResult<bool>;

    /// Appends an entry and returns the id assigned to it.
    async fn stream_add(&self, stream: &str, fields: &StreamFields) -> StoreResult<String>;

    /// Reads up to `count` entries for `consumer` within `group`.
    ///
    /// With [`ReadCursor::New`] and `block = Some(d)` the call waits up to `d`
    /// for new entries and returns an empty list on timeout. Entries read with
    /// [`ReadCursor::New`] enter the group's pending region until acknowledged.
    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> StoreResult<Vec<StreamEntry>>;

    /// Acknowledges entries, removing them from the pending region.
    async fn stream_ack(&self, stream: &str, group: &str, ids: &[String]) -> StoreResult<u64>;

    /// Number of delivered but unacknowledged entries in the group.
    async fn stream_pending(&self, stream: &str, group: &str) -> StoreResult<u64>;

    /// Number of entries in the stream.
    async fn stream_len(&self, stream: &str) -> StoreResult<u64>;

    // ==================== Metadata ====================

    /// Round-trip health check.
    async fn ping(&self) -> StoreResult<()>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
