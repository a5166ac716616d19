use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use super::stream::StreamLog;
use crate::error::{StoreError, StoreResult};
use crate::stream::{ReadCursor, StreamEntry, StreamFields};

#[derive(Debug)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::command(format!(
        "WRONGTYPE Operation against key '{key}' holding the wrong kind of value"
    ))
}

fn parse_int(key: &str, bytes: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| StoreError::command(format!("value at '{key}' is not an integer")))
}

/// The whole dataset of an [`super::InMemoryStore`].
///
/// Native procedures receive `&mut MemoryState` while the store's lock is
/// held, so everything they do is atomic with respect to every other
/// operation. Expired keys are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryState {
    slots: HashMap<String, Slot>,
    streams: HashMap<String, StreamLog>,
}

impl MemoryState {
    fn live_slot(&mut self, key: &str) -> Option<&mut Slot> {
        let now = Instant::now();
        if self.slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            self.slots.remove(key);
        }
        self.slots.get_mut(key)
    }

    pub fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.live_slot(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// Reads an integer value; `None` if absent.
    pub fn get_int(&mut self, key: &str) -> StoreResult<Option<i64>> {
        match self.get(key)? {
            Some(bytes) => parse_int(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn set(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Bytes(value),
                expires_at,
            },
        );
    }

    pub fn set_if_absent(&mut self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        if self.live_slot(key).is_some() {
            return false;
        }
        self.set(key, value, Some(ttl));
        true
    }

    pub fn delete(&mut self, key: &str) -> bool {
        let removed_value = self.live_slot(key).is_some() && self.slots.remove(key).is_some();
        let removed_stream = self.streams.remove(key).is_some();
        removed_value || removed_stream
    }

    /// Adds `delta` to an integer value, keeping its TTL.
    pub fn incr_by(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        let (current, expires_at) = match self.live_slot(key) {
            None => (0, None),
            Some(Slot {
                value: Value::Bytes(bytes),
                expires_at,
            }) => (parse_int(key, bytes)?, *expires_at),
            Some(_) => return Err(wrong_type(key)),
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::command(format!("increment would overflow '{key}'")))?;
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Bytes(next.to_string().into_bytes()),
                expires_at,
            },
        );
        Ok(next)
    }

    /// Replaces the TTL of an existing key. Returns `false` if the key is absent.
    pub fn pexpire(&mut self, key: &str, ttl: Duration) -> bool {
        match self.live_slot(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    /// Adds a member to a set. Returns whether it was newly added.
    pub fn sadd(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        match self.live_slot(key) {
            None => {
                self.slots.insert(
                    key.to_string(),
                    Slot {
                        value: Value::Set(HashSet::from([member.to_string()])),
                        expires_at: None,
                    },
                );
                Ok(true)
            }
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => Ok(members.insert(member.to_string())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    pub fn sismember(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        match self.live_slot(key) {
            None => Ok(false),
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => Ok(members.contains(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// Appends to a stream (created on demand) and returns the new entry id.
    pub fn xadd(&mut self, stream: &str, fields: StreamFields) -> String {
        self.streams
            .entry(stream.to_string())
            .or_default()
            .append(fields)
            .to_string()
    }

    pub(crate) fn create_group(&mut self, stream: &str, group: &str) -> bool {
        self.streams
            .entry(stream.to_string())
            .or_default()
            .create_group(group)
    }

    pub(crate) fn read_group(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        self.streams
            .get_mut(stream)
            .ok_or_else(|| no_group(stream, group))?
            .read_group(group, consumer, cursor, count)
            .ok_or_else(|| no_group(stream, group))
    }

    pub(crate) fn ack(&mut self, stream: &str, group: &str, ids: &[String]) -> StoreResult<u64> {
        match self.streams.get_mut(stream) {
            Some(log) => log.ack(group, ids).ok_or_else(|| no_group(stream, group)),
            None => Ok(0),
        }
    }

    pub(crate) fn pending(&mut self, stream: &str, group: &str) -> StoreResult<u64> {
        self.streams
            .get(stream)
            .and_then(|log| log.pending_count(group))
            .ok_or_else(|| no_group(stream, group))
    }

    pub(crate) fn stream_len(&self, stream: &str) -> u64 {
        self.streams.get(stream).map_or(0, StreamLog::len)
    }
}

fn no_group(stream: &str, group: &str) -> StoreError {
    StoreError::command(format!(
        "NOGROUP No such key '{stream}' or consumer group '{group}'"
    ))
}
