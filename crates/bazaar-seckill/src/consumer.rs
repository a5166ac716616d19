//! Asynchronous order persistence.
//!
//! One consumer task per process reads the admission stream through a
//! consumer group. Each entry is acknowledged only after its order is
//! persisted (or found to exist already). Anything else leaves it in this
//! consumer's pending list, where the recovery loop retries it with bounded
//! exponential backoff; an entry that keeps failing is moved to the
//! dead-letter stream after `max_attempts`.

use std::sync::Arc;
use std::time::Duration;

use bazaar_core::SharedClock;
use bazaar_core::keys::seckill::attempts_key;
use bazaar_core::metrics::record_queue_entry;
use bazaar_store::{KeyValueStore, ReadCursor, StreamEntry};
use bazaar_sync::DistributedLock;
use tokio_util::sync::CancellationToken;

use crate::config::SeckillConfig;
use crate::error::{SeckillError, SeckillResult};
use crate::order::{AdmissionRecord, VoucherOrder};
use crate::repository::OrderRepository;

/// Result of handling one stream entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Order written, entry acknowledged.
    Persisted,
    /// Order already existed (redelivery), entry acknowledged.
    Duplicate,
    /// Per-user lock held elsewhere; entry stays pending.
    Deferred,
    /// Processing failed; entry stays pending with its attempt counted.
    Failed,
    /// Moved to the dead-letter stream and acknowledged.
    DeadLettered,
}

impl ProcessOutcome {
    /// Whether the entry has left the pending list.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Persisted | Self::Duplicate | Self::DeadLettered)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Duplicate => "duplicate",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

pub struct OrderQueueConsumer {
    store: Arc<dyn KeyValueStore>,
    locks: DistributedLock,
    repository: Arc<dyn OrderRepository>,
    clock: SharedClock,
    config: SeckillConfig,
    consumer: String,
}

impl OrderQueueConsumer {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        locks: DistributedLock,
        repository: Arc<dyn OrderRepository>,
        clock: SharedClock,
        config: SeckillConfig,
    ) -> Self {
        let consumer = config.consumer_name();
        Self {
            store,
            locks,
            repository,
            clock,
            config,
            consumer,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Creates the stream and consumer group if they do not exist yet.
    pub async fn ensure_group(&self) -> SeckillResult<()> {
        let created = self
            .store
            .stream_create_group(&self.config.stream, &self.config.group)
            .await?;
        if created {
            tracing::info!(stream = %self.config.stream, group = %self.config.group, "consumer group created");
        }
        Ok(())
    }

    /// Drains this consumer's pending list, then consumes new entries until
    /// `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            consumer = %self.consumer,
            stream = %self.config.stream,
            group = %self.config.group,
            "order queue consumer started"
        );

        self.recover_pending(&shutdown).await;

        let mut backoff = self.config.backoff_base();
        while !shutdown.is_cancelled() {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = self.read(ReadCursor::New, 1, Some(self.config.block())) => read,
            };

            let entries = match read {
                Ok(entries) => {
                    backoff = self.config.backoff_base();
                    entries
                }
                Err(e) => {
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "reading order stream failed");
                    if !sleep_or_cancel(backoff, &shutdown).await {
                        break;
                    }
                    backoff = self.next_backoff(backoff);
                    continue;
                }
            };

            let mut unsettled = false;
            for entry in &entries {
                match self.handle(entry).await {
                    Ok(outcome) => unsettled |= !outcome.is_settled(),
                    Err(e) => {
                        tracing::warn!(entry_id = %entry.id, error = %e, "order entry left pending");
                        unsettled = true;
                    }
                }
            }
            if unsettled {
                self.recover_pending(&shutdown).await;
            }
        }

        tracing::info!(consumer = %self.consumer, "order queue consumer stopped");
    }

    /// Reads and handles at most one new entry, waiting up to the configured
    /// block time. `None` when nothing arrived.
    pub async fn poll_once(&self) -> SeckillResult<Option<ProcessOutcome>> {
        let entries = self
            .read(ReadCursor::New, 1, Some(self.config.block()))
            .await?;
        match entries.first() {
            Some(entry) => self.handle(entry).await.map(Some),
            None => Ok(None),
        }
    }

    /// Reprocesses this consumer's unacknowledged entries until none are
    /// left or `shutdown` is cancelled. Rounds that leave entries pending are
    /// followed by a backoff that doubles up to `backoff_max`.
    pub async fn recover_pending(&self, shutdown: &CancellationToken) {
        let mut backoff = self.config.backoff_base();
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let settled_all = match self
                .read(ReadCursor::Pending, self.config.pending_batch, None)
                .await
            {
                Ok(entries) if entries.is_empty() => {
                    tracing::debug!(consumer = %self.consumer, "pending list empty");
                    return;
                }
                Ok(entries) => {
                    tracing::info!(count = entries.len(), "recovering pending order entries");
                    let mut settled_all = true;
                    for entry in &entries {
                        match self.handle(entry).await {
                            Ok(outcome) => settled_all &= outcome.is_settled(),
                            Err(e) => {
                                tracing::warn!(entry_id = %entry.id, error = %e, "pending entry retry failed");
                                settled_all = false;
                            }
                        }
                    }
                    settled_all
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reading pending list failed");
                    false
                }
            };

            if settled_all {
                backoff = self.config.backoff_base();
                continue;
            }
            tracing::debug!(backoff_ms = backoff.as_millis() as u64, "pending entries remain, backing off");
            if !sleep_or_cancel(backoff, shutdown).await {
                return;
            }
            backoff = self.next_backoff(backoff);
        }
    }

    async fn read(
        &self,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> SeckillResult<Vec<StreamEntry>> {
        Ok(self
            .store
            .stream_read_group(
                &self.config.stream,
                &self.config.group,
                &self.consumer,
                cursor,
                count,
                block,
            )
            .await?)
    }

    /// Handles one delivered entry. `Err` only for store failures while
    /// acknowledging or dead-lettering; the entry then stays pending.
    async fn handle(&self, entry: &StreamEntry) -> SeckillResult<ProcessOutcome> {
        let record = match AdmissionRecord::from_entry(entry) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(entry_id = %entry.id, error = %e, "undecodable order entry");
                self.dead_letter(entry, 1, &e).await?;
                record_queue_entry(ProcessOutcome::DeadLettered.as_str());
                return Ok(ProcessOutcome::DeadLettered);
            }
        };

        let outcome = match self.process(&record).await {
            Ok(outcome @ (ProcessOutcome::Persisted | ProcessOutcome::Duplicate)) => {
                self.acknowledge(entry).await?;
                outcome
            }
            Ok(outcome) => outcome,
            Err(e) => self.record_failure(entry, &record, e).await?,
        };
        record_queue_entry(outcome.as_str());
        Ok(outcome)
    }

    async fn process(&self, record: &AdmissionRecord) -> SeckillResult<ProcessOutcome> {
        let lock_name = format!("order:{}", record.user_id);
        let Some(guard) = self.locks.try_lock(&lock_name, self.config.lock_ttl()).await? else {
            tracing::info!(
                user_id = record.user_id,
                order_id = record.order_id,
                "user lock busy, deferring order"
            );
            return Ok(ProcessOutcome::Deferred);
        };

        let result = self.persist(record).await;
        if let Err(e) = guard.release().await {
            tracing::warn!(lock = %lock_name, error = %e, "failed to release order lock");
        }
        result
    }

    async fn persist(&self, record: &AdmissionRecord) -> SeckillResult<ProcessOutcome> {
        let mut tx = self.repository.begin().await?;

        if let Some(existing) = tx.find_order(record.user_id, record.voucher_id).await? {
            tx.rollback().await?;
            tracing::info!(
                user_id = record.user_id,
                voucher_id = record.voucher_id,
                existing_order = existing.id,
                "order already persisted"
            );
            return Ok(ProcessOutcome::Duplicate);
        }

        if !tx.decrement_stock(record.voucher_id).await? {
            tx.rollback().await?;
            return Err(SeckillError::StockDepleted {
                voucher_id: record.voucher_id,
            });
        }

        let order = VoucherOrder::from_record(record, self.clock.now());
        tx.insert_order(&order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            user_id = order.user_id,
            voucher_id = order.voucher_id,
            "order persisted"
        );
        Ok(ProcessOutcome::Persisted)
    }

    async fn acknowledge(&self, entry: &StreamEntry) -> SeckillResult<()> {
        self.store
            .stream_ack(&self.config.stream, &self.config.group, &[entry.id.clone()])
            .await?;
        self.store.delete(&attempts_key(&entry.id)).await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        entry: &StreamEntry,
        record: &AdmissionRecord,
        error: SeckillError,
    ) -> SeckillResult<ProcessOutcome> {
        let attempts = self.store.increment(&attempts_key(&entry.id)).await?;
        if attempts >= i64::from(self.config.max_attempts) {
            tracing::error!(
                entry_id = %entry.id,
                order_id = record.order_id,
                attempts,
                error = %error,
                "order entry exhausted its attempts"
            );
            self.dead_letter(entry, attempts, &error).await?;
            return Ok(ProcessOutcome::DeadLettered);
        }

        tracing::warn!(
            entry_id = %entry.id,
            order_id = record.order_id,
            attempts,
            error = %error,
            "order processing failed, entry left pending"
        );
        Ok(ProcessOutcome::Failed)
    }

    async fn dead_letter(
        &self,
        entry: &StreamEntry,
        attempts: i64,
        error: &SeckillError,
    ) -> SeckillResult<()> {
        let mut fields = entry.fields.clone();
        fields.push(("sourceId".to_string(), entry.id.clone()));
        fields.push(("attempts".to_string(), attempts.to_string()));
        fields.push(("error".to_string(), error.to_string()));

        let dead_id = self
            .store
            .stream_add(&self.config.dead_letter_stream, &fields)
            .await?;
        self.acknowledge(entry).await?;
        tracing::warn!(
            entry_id = %entry.id,
            dead_letter_id = %dead_id,
            stream = %self.config.dead_letter_stream,
            "order entry dead-lettered"
        );
        Ok(())
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.config.backoff_max())
    }
}

impl std::fmt::Debug for OrderQueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderQueueConsumer")
            .field("consumer", &self.consumer)
            .field("stream", &self.config.stream)
            .field("group", &self.config.group)
            .finish()
    }
}

/// Sleeps for `duration`; `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
