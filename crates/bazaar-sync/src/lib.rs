//! Coordination primitives shared by every Bazaar service instance.
//!
//! - [`IdGenerator`]: time-ordered 64-bit identifiers backed by a per-day
//!   store counter
//! - [`DistributedLock`]: owner-token mutual exclusion with atomic release,
//!   renewal, a watchdog and bounded retry

pub mod id;
pub mod lock;

pub use id::{ID_EPOCH_SECONDS, IdError, IdGenerator, SEQUENCE_BITS, split_id};
pub use lock::{DistributedLock, LockError, LockGuard, RetryPolicy};
