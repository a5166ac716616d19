//! Single-process store backend.
//!
//! All data sits behind one `parking_lot::Mutex`, so every operation and
//! every native procedure is indivisible, mirroring Redis' single-threaded
//! command execution. Blocking stream reads park on a `tokio::sync::Notify`
//! that is signalled after every append.

mod state;
mod stream;

pub use state::MemoryState;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::StoreResult;
use crate::procedure::{Procedure, ScriptValue};
use crate::stream::{ReadCursor, StreamEntry, StreamFields};
use crate::traits::KeyValueStore;

/// In-memory [`KeyValueStore`].
///
/// Cloning is cheap and clones share the same data, which lets tests model
/// several application instances talking to one store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    appended: Arc<Notify>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the dataset.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut *state)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.state.lock().get(key)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.state.lock().set(key, value.to_vec(), ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        Ok(self.state.lock().set_if_absent(key, value.to_vec(), ttl))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.state.lock().delete(key))
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.state.lock().incr_by(key, 1)
    }

    async fn eval(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptValue> {
        let result = {
            let mut state = self.state.lock();
            (procedure.native())(&mut *state, keys, args)
        };
        // A procedure may have appended to a stream.
        self.appended.notify_waiters();
        result
    }

    async fn stream_create_group(&self, stream: &str, group: &str) -> StoreResult<bool> {
        Ok(self.state.lock().create_group(stream, group))
    }

    async fn stream_add(&self, stream: &str, fields: &StreamFields) -> StoreResult<String> {
        let id = self.state.lock().xadd(stream, fields.clone());
        self.appended.notify_waiters();
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
        let deadline = block.map(|block| Instant::now() + block);
        loop {
            // Register interest before looking so an append between the
            // read and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self
                .state
                .lock()
                .read_group(stream, group, consumer, cursor, count)?;
            if !entries.is_empty() || cursor == ReadCursor::Pending {
                return Ok(entries);
            }
            let Some(deadline) = deadline else {
                return Ok(entries);
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn stream_ack(&self, stream: &str, group: &str, ids: &[String]) -> StoreResult<u64> {
        self.state.lock().ack(stream, group, ids)
    }

    async fn stream_pending(&self, stream: &str, group: &str) -> StoreResult<u64> {
        self.state.lock().pending(stream, group)
    }

    async fn stream_len(&self, stream: &str) -> StoreResult<u64> {
        Ok(self.state.lock().stream_len(stream))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
