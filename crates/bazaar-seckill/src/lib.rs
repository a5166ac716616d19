//! Flash-sale ("seckill") path.
//!
//! Admission is synchronous and decided by one atomic store procedure that
//! checks the sale window, stock and per-user dedup, then decrements stock,
//! marks the user and enqueues an [`AdmissionRecord`]. Persistence happens
//! later: [`OrderQueueConsumer`] drains the durable stream through a
//! consumer group, writes orders through an [`OrderRepository`] and
//! acknowledges only what it has persisted.

pub mod config;
pub mod consumer;
pub mod error;
pub mod gate;
pub mod order;
pub mod procedure;
pub mod repository;
pub mod voucher;

pub use config::SeckillConfig;
pub use consumer::{OrderQueueConsumer, ProcessOutcome};
pub use error::{SeckillError, SeckillResult};
pub use gate::{AdmissionGate, AdmissionOutcome, Rejection};
pub use order::{AdmissionRecord, VoucherOrder};
pub use repository::{InMemoryOrderRepository, OrderRepository, OrderTransaction, RepositoryError};
pub use voucher::SeckillVoucher;
