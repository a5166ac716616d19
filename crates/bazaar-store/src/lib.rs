//! Key/value store abstraction for the Bazaar consistency layer.
//!
//! This crate provides:
//! - [`KeyValueStore`]: the contract every backend implements (get/set with
//!   TTL, set-if-absent, atomic increment, atomic procedures and durable
//!   consumer-group streams)
//! - [`Procedure`]: an atomic server-side procedure with a Lua rendition for
//!   Redis and a native rendition for the in-memory backend
//! - [`InMemoryStore`]: single-process backend, used in tests and when Redis
//!   is disabled
//! - [`RedisStore`]: `deadpool-redis` backed implementation for multi-instance
//!   deployments

pub mod config;
pub mod error;
pub mod factory;
pub mod memory;
pub mod procedure;
pub mod redis_store;
pub mod stream;
pub mod traits;

pub use config::RedisConfig;
pub use error::{StoreError, StoreResult};
pub use factory::create_store;
pub use memory::{InMemoryStore, MemoryState};
pub use procedure::{NativeProcedure, Procedure, ScriptValue};
pub use redis_store::RedisStore;
pub use stream::{ReadCursor, StreamEntry, StreamFields};
pub use traits::KeyValueStore;
