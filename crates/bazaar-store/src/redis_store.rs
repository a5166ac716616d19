//! Redis backend.
//!
//! Plain commands map one-to-one onto Redis commands; procedures run through
//! `EVALSHA` (falling back to `EVAL` on a script-cache miss, handled by
//! `redis::Script`); streams use `XADD`/`XREADGROUP`/`XACK`.

use std::time::Duration;

use ::redis::streams::{StreamPendingReply, StreamReadOptions, StreamReadReply};
use ::redis::{AsyncCommands, FromRedisValue, Script};
use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;

use crate::error::{StoreError, StoreResult};
use crate::procedure::{Procedure, ScriptValue};
use crate::stream::{ReadCursor, StreamEntry, StreamFields};
use crate::traits::KeyValueStore;

/// [`KeyValueStore`] backed by a Redis connection pool.
pub struct RedisStore {
    pool: Pool,
    scripts: DashMap<&'static str, Script>,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            scripts: DashMap::new(),
        }
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Compiled script for a procedure; the SHA is computed once per name.
    fn script(&self, procedure: &Procedure) -> Script {
        self.scripts
            .entry(procedure.name())
            .or_insert_with(|| Script::new(procedure.lua()))
            .clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn script_value(value: ::redis::Value) -> ScriptValue {
    match value {
        ::redis::Value::Nil => ScriptValue::Nil,
        ::redis::Value::Int(n) => ScriptValue::Int(n),
        ::redis::Value::BulkString(bytes) => ScriptValue::Bytes(bytes),
        ::redis::Value::SimpleString(text) => ScriptValue::Bytes(text.into_bytes()),
        ::redis::Value::Okay => ScriptValue::Bytes(b"OK".to_vec()),
        other => ScriptValue::Other(format!("{other:?}")),
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.pset_ex(key, value, millis(ttl)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn eval(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptValue> {
        let mut conn = self.conn().await?;
        let script = self.script(procedure);
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let reply: ::redis::RedisResult<::redis::Value> = invocation.invoke_async(&mut conn).await;
        match reply {
            Ok(value) => Ok(script_value(value)),
            Err(e) => match StoreError::from(e) {
                unavailable @ StoreError::Unavailable { .. } => Err(unavailable),
                other => Err(StoreError::script(procedure.name(), other.to_string())),
            },
        }
    }

    async fn stream_create_group(&self, stream: &str, group: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let created: ::redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn stream_add(&self, stream: &str, fields: &StreamFields) -> StoreResult<String> {
        let mut conn = self.conn().await?;
        let id: String = conn.xadd(stream, "*", fields.as_slice()).await?;
        Ok(id)
    }

    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> StoreResult<Vec<StreamEntry>> {
        let mut conn = self.conn().await?;
        let mut options = StreamReadOptions::default().group(group, consumer).count(count);
        if let Some(block) = block {
            options = options.block(usize::try_from(block.as_millis()).unwrap_or(usize::MAX));
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[cursor.as_redis_id()], &options)
            .await?;

        let entries = reply
            .map(|reply| reply.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| {
                let mut fields: StreamFields = entry
                    .map
                    .iter()
                    .filter_map(|(name, value)| {
                        String::from_redis_value(value)
                            .ok()
                            .map(|value| (name.clone(), value))
                    })
                    .collect();
                fields.sort();
                StreamEntry {
                    id: entry.id,
                    fields,
                }
            })
            .collect();
        Ok(entries)
    }

    async fn stream_ack(&self, stream: &str, group: &str, ids: &[String]) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let acked: u64 = conn.xack(stream, group, ids).await?;
        Ok(acked)
    }

    async fn stream_pending(&self, stream: &str, group: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let reply: StreamPendingReply = conn.xpending(stream, group).await?;
        Ok(reply.count() as u64)
    }

    async fn stream_len(&self, stream: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(stream).await?;
        Ok(len)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
