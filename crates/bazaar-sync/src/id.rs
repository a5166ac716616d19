//! Globally unique, time-ordered 64-bit identifiers.
//!
//! Layout: `(seconds since 2025-01-01T00:00:00Z) << 32 | sequence`, where the
//! sequence is a store counter keyed by prefix and UTC day. Every instance
//! sharing the store draws from the same counter, so identifiers never
//! collide across processes.

use std::sync::Arc;

use bazaar_core::{SharedClock, counter_key, day_key};
use bazaar_store::{KeyValueStore, StoreError};
use thiserror::Error;

/// Custom epoch, 2025-01-01T00:00:00Z.
pub const ID_EPOCH_SECONDS: i64 = 1_735_689_600;

/// Low bits reserved for the per-day sequence.
pub const SEQUENCE_BITS: u32 = 32;

const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Error)]
pub enum IdError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("sequence for '{prefix}' on {day} no longer fits in {SEQUENCE_BITS} bits")]
    SequenceExhausted { prefix: String, day: String },

    #[error("clock reads {seconds}s, before the identifier epoch")]
    ClockBeforeEpoch { seconds: i64 },
}

/// Splits an identifier into its time segment and sequence.
pub fn split_id(id: u64) -> (u64, u32) {
    (id >> SEQUENCE_BITS, (id & SEQUENCE_MASK) as u32)
}

#[derive(Clone)]
pub struct IdGenerator {
    store: Arc<dyn KeyValueStore>,
    clock: SharedClock,
}

impl IdGenerator {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Next identifier for `prefix` (for example `"order"`).
    pub async fn next_id(&self, prefix: &str) -> Result<u64, IdError> {
        let now = self.clock.now();
        let seconds = now.unix_timestamp();
        let segment = seconds - ID_EPOCH_SECONDS;
        if segment < 0 {
            return Err(IdError::ClockBeforeEpoch { seconds });
        }

        let day = day_key(now);
        let sequence = self.store.increment(&counter_key(prefix, &day)).await?;
        if sequence <= 0 || sequence as u64 > SEQUENCE_MASK {
            tracing::error!(prefix, day = %day, sequence, "identifier sequence exhausted");
            return Err(IdError::SequenceExhausted {
                prefix: prefix.to_string(),
                day,
            });
        }

        Ok(((segment as u64) << SEQUENCE_BITS) | sequence as u64)
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}
