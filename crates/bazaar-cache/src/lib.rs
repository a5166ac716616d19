//! Read-through caching for hot entities.
//!
//! [`CacheClient`] offers three read strategies over a shared
//! [`KeyValueStore`](bazaar_store::KeyValueStore):
//!
//! - pass-through with null markers, against cache penetration
//! - mutex rebuild, against cache breakdown when staleness is not acceptable
//! - logical expiration with asynchronous rebuild on a bounded
//!   [`RebuildPool`], against cache breakdown on pre-warmed hot keys
//!
//! Writes go to the upstream store first; the cache key is deleted only after
//! the write succeeded.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod pool;

pub use client::CacheClient;
pub use config::CacheConfig;
pub use envelope::LogicalExpiry;
pub use error::{CacheError, CacheResult};
pub use pool::{RebuildPool, RebuildSlot};
