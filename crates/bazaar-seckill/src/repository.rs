//! Order persistence boundary.
//!
//! The relational store lives outside this crate. The consumer only needs a
//! transaction that can look up an order, decrement stock under a
//! `stock > 0` guard and insert the order row.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::order::VoucherOrder;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("order store unavailable: {message}")]
    Unavailable { message: String },

    #[error("order {id} already exists")]
    AlreadyExists { id: u64 },

    #[error("transaction error: {message}")]
    Transaction { message: String },
}

impl RepositoryError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Transaction { .. })
    }
}

/// Source of order transactions.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, RepositoryError>;
}

/// One unit of work against the order store.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Existing order of `user_id` for `voucher_id`, including uncommitted writes.
    async fn find_order(
        &mut self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<Option<VoucherOrder>, RepositoryError>;

    /// Decrements persisted stock if it is positive. Returns whether it did.
    async fn decrement_stock(&mut self, voucher_id: u64) -> Result<bool, RepositoryError>;

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

#[derive(Debug, Default)]
struct OrderTables {
    orders: HashMap<u64, VoucherOrder>,
    stock: HashMap<u64, i64>,
}

impl OrderTables {
    fn find(&self, user_id: u64, voucher_id: u64) -> Option<&VoucherOrder> {
        self.orders
            .values()
            .find(|order| order.user_id == user_id && order.voucher_id == voucher_id)
    }
}

/// In-process order store.
///
/// Transactions are fully serialized: `begin` takes the table lock and holds
/// it until commit or rollback. Writes are buffered and applied on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    tables: Arc<Mutex<OrderTables>>,
    failing_commits: Arc<AtomicU32>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_stock(&self, voucher_id: u64, stock: i64) {
        self.tables.lock().await.stock.insert(voucher_id, stock);
    }

    pub async fn stock(&self, voucher_id: u64) -> Option<i64> {
        self.tables.lock().await.stock.get(&voucher_id).copied()
    }

    /// Committed orders, sorted by id.
    pub async fn orders(&self) -> Vec<VoucherOrder> {
        let mut orders: Vec<_> = self.tables.lock().await.orders.values().cloned().collect();
        orders.sort_by_key(|order| order.id);
        orders
    }

    /// Makes the next `count` commits fail, simulating an unavailable database.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, RepositoryError> {
        let tables = self.tables.clone().lock_owned().await;
        Ok(Box::new(InMemoryOrderTransaction {
            tables,
            repository: self.clone(),
            inserts: Vec::new(),
            decrements: HashMap::new(),
        }))
    }
}

struct InMemoryOrderTransaction {
    tables: OwnedMutexGuard<OrderTables>,
    repository: InMemoryOrderRepository,
    inserts: Vec<VoucherOrder>,
    decrements: HashMap<u64, i64>,
}

#[async_trait]
impl OrderTransaction for InMemoryOrderTransaction {
    async fn find_order(
        &mut self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<Option<VoucherOrder>, RepositoryError> {
        let buffered = self
            .inserts
            .iter()
            .find(|order| order.user_id == user_id && order.voucher_id == voucher_id);
        Ok(buffered
            .or_else(|| self.tables.find(user_id, voucher_id))
            .cloned())
    }

    async fn decrement_stock(&mut self, voucher_id: u64) -> Result<bool, RepositoryError> {
        let committed = self.tables.stock.get(&voucher_id).copied().unwrap_or(0);
        let pending = self.decrements.entry(voucher_id).or_insert(0);
        if committed - *pending <= 0 {
            return Ok(false);
        }
        *pending += 1;
        Ok(true)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), RepositoryError> {
        if self.tables.orders.contains_key(&order.id) || self.inserts.iter().any(|o| o.id == order.id) {
            return Err(RepositoryError::AlreadyExists { id: order.id });
        }
        self.inserts.push(order.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let mut this = *self;
        if this.repository.take_commit_failure() {
            return Err(RepositoryError::unavailable("injected commit failure"));
        }
        for (voucher_id, count) in this.decrements.drain() {
            if let Some(stock) = this.tables.stock.get_mut(&voucher_id) {
                *stock -= count;
            }
        }
        for order in this.inserts.drain(..) {
            this.tables.orders.insert(order.id, order);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}
