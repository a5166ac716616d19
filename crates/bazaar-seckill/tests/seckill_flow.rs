//! Admission and order persistence against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bazaar_core::keys::seckill::stock_key;
use bazaar_core::{ManualClock, SharedClock};
use bazaar_seckill::{
    AdmissionGate, AdmissionOutcome, AdmissionRecord, InMemoryOrderRepository, OrderQueueConsumer,
    ProcessOutcome, Rejection, SeckillConfig, SeckillVoucher,
};
use bazaar_store::{InMemoryStore, KeyValueStore, ReadCursor};
use bazaar_sync::{DistributedLock, IdGenerator};
use time::OffsetDateTime;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;

const VOUCHER: u64 = 10;

struct World {
    store: InMemoryStore,
    shared: Arc<dyn KeyValueStore>,
    clock: Arc<ManualClock>,
    gate: AdmissionGate,
    repository: InMemoryOrderRepository,
    config: SeckillConfig,
}

fn config() -> SeckillConfig {
    SeckillConfig {
        consumer: Some("c1".to_string()),
        block_ms: 50,
        backoff_base_ms: 1,
        backoff_max_ms: 10,
        max_attempts: 3,
        ..SeckillConfig::default()
    }
}

fn now() -> OffsetDateTime {
    datetime!(2025-06-18 20:00:00 UTC)
}

async fn world(stock: i64) -> World {
    let store = InMemoryStore::new();
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    let clock = Arc::new(ManualClock::new(now()));
    let shared_clock: SharedClock = clock.clone();
    let config = config();
    let gate = AdmissionGate::new(
        shared.clone(),
        IdGenerator::new(shared.clone(), shared_clock.clone()),
        shared_clock,
        config.stream.clone(),
    );
    gate.publish_voucher(&SeckillVoucher {
        id: VOUCHER,
        stock,
        begin: now() - Duration::from_secs(3600),
        end: now() + Duration::from_secs(3600),
    })
    .await
    .unwrap();

    let repository = InMemoryOrderRepository::new();
    repository.set_stock(VOUCHER, stock).await;

    World {
        store,
        shared,
        clock,
        gate,
        repository,
        config,
    }
}

impl World {
    fn consumer(&self, config: SeckillConfig) -> OrderQueueConsumer {
        OrderQueueConsumer::new(
            self.shared.clone(),
            DistributedLock::new(self.shared.clone()),
            Arc::new(self.repository.clone()),
            self.clock.clone(),
            config,
        )
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_oversell_under_concurrent_admissions() {
    let w = world(10).await;

    let mut tasks = Vec::new();
    for user in 0..200u64 {
        let gate = w.gate.clone();
        tasks.push(tokio::spawn(async move { gate.admit(VOUCHER, user).await.unwrap() }));
    }
    let mut admitted = 0;
    let mut order_ids = HashSet::new();
    for task in tasks {
        match task.await.unwrap() {
            AdmissionOutcome::Admitted { order_id } => {
                admitted += 1;
                assert!(order_ids.insert(order_id));
            }
            AdmissionOutcome::Rejected(reason) => assert_eq!(reason, Rejection::OutOfStock),
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(w.store.stream_len(&w.config.stream).await.unwrap(), 10);
    assert_eq!(w.store.get(&stock_key(VOUCHER)).await.unwrap(), Some(b"0".to_vec()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_is_admitted_once() {
    let w = world(5).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let gate = w.gate.clone();
        tasks.push(tokio::spawn(async move { gate.admit(VOUCHER, 42).await.unwrap() }));
    }
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| o.is_admitted()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter(|o| !o.is_admitted())
            .all(|o| *o == AdmissionOutcome::Rejected(Rejection::DuplicateOrder))
    );
    assert_eq!(w.store.get(&stock_key(VOUCHER)).await.unwrap(), Some(b"4".to_vec()));
}

#[tokio::test]
async fn test_sale_window_and_unknown_voucher() {
    let w = world(5).await;

    w.clock.set(now() - Duration::from_secs(7200));
    assert_eq!(
        w.gate.admit(VOUCHER, 1).await.unwrap(),
        AdmissionOutcome::Rejected(Rejection::NotStarted)
    );

    w.clock.set(now() + Duration::from_secs(7200));
    assert_eq!(
        w.gate.admit(VOUCHER, 1).await.unwrap(),
        AdmissionOutcome::Rejected(Rejection::Ended)
    );

    w.clock.set(now());
    assert_eq!(
        w.gate.admit(999, 1).await.unwrap(),
        AdmissionOutcome::Rejected(Rejection::UnknownVoucher)
    );
    assert_eq!(w.store.stream_len(&w.config.stream).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_voucher_is_not_published() {
    let w = world(1).await;
    let err = w
        .gate
        .publish_voucher(&SeckillVoucher {
            id: 11,
            stock: -1,
            begin: now(),
            end: now(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("negative stock"));
    assert!(w.store.get(&stock_key(11)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_consumer_persists_and_acknowledges() {
    let w = world(2).await;
    let consumer = w.consumer(w.config.clone());
    consumer.ensure_group().await.unwrap();

    let order_id = w.gate.admit(VOUCHER, 7).await.unwrap().order_id().unwrap();
    assert_eq!(consumer.poll_once().await.unwrap(), Some(ProcessOutcome::Persisted));
    assert_eq!(consumer.poll_once().await.unwrap(), None);

    let orders = w.repository.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id, order_id);
    assert_eq!(orders[0].user_id, 7);
    assert_eq!(orders[0].created_at, now());
    assert_eq!(w.repository.stock(VOUCHER).await, Some(1));
    assert_eq!(w.store.stream_pending(&w.config.stream, &w.config.group).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unacknowledged_entry_is_recovered_after_crash() {
    let w = world(1).await;
    let consumer = w.consumer(w.config.clone());
    consumer.ensure_group().await.unwrap();
    w.gate.admit(VOUCHER, 7).await.unwrap();

    // A previous process with the same consumer name read the entry and died.
    let delivered = w
        .store
        .stream_read_group(&w.config.stream, &w.config.group, "c1", ReadCursor::New, 1, None)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(w.store.stream_pending(&w.config.stream, &w.config.group).await.unwrap(), 1);

    consumer.recover_pending(&CancellationToken::new()).await;

    assert_eq!(w.repository.orders().await.len(), 1);
    assert_eq!(w.store.stream_pending(&w.config.stream, &w.config.group).await.unwrap(), 0);
}

#[tokio::test]
async fn test_redelivered_entry_does_not_duplicate_order() {
    let w = world(3).await;
    let consumer = w.consumer(w.config.clone());
    consumer.ensure_group().await.unwrap();

    let order_id = w.gate.admit(VOUCHER, 7).await.unwrap().order_id().unwrap();
    assert_eq!(consumer.poll_once().await.unwrap(), Some(ProcessOutcome::Persisted));

    // Same record appended again, as an at-least-once redelivery would.
    let record = AdmissionRecord {
        order_id,
        user_id: 7,
        voucher_id: VOUCHER,
    };
    w.store.stream_add(&w.config.stream, &record.to_fields()).await.unwrap();
    assert_eq!(consumer.poll_once().await.unwrap(), Some(ProcessOutcome::Duplicate));

    assert_eq!(w.repository.orders().await.len(), 1);
    assert_eq!(w.repository.stock(VOUCHER).await, Some(2));
}

#[tokio::test]
async fn test_busy_user_lock_defers_instead_of_dropping() {
    let w = world(1).await;
    let consumer = w.consumer(w.config.clone());
    consumer.ensure_group().await.unwrap();
    w.gate.admit(VOUCHER, 7).await.unwrap();

    let other = DistributedLock::new(w.shared.clone());
    let held = other
        .try_lock("order:7", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consumer.poll_once().await.unwrap(), Some(ProcessOutcome::Deferred));
    assert_eq!(w.store.stream_pending(&w.config.stream, &w.config.group).await.unwrap(), 1);

    held.release().await.unwrap();
    consumer.recover_pending(&CancellationToken::new()).await;
    assert_eq!(w.repository.orders().await.len(), 1);
}

#[tokio::test]
async fn test_failing_entry_is_dead_lettered_after_max_attempts() {
    let w = world(1).await;
    let consumer = w.consumer(w.config.clone());
    consumer.ensure_group().await.unwrap();
    w.gate.admit(VOUCHER, 7).await.unwrap();
    w.repository.fail_next_commits(100);

    assert_eq!(consumer.poll_once().await.unwrap(), Some(ProcessOutcome::Failed));
    consumer.recover_pending(&CancellationToken::new()).await;

    assert!(w.repository.orders().await.is_empty());
    assert_eq!(w.store.stream_pending(&w.config.stream, &w.config.group).await.unwrap(), 0);
    assert_eq!(w.store.stream_len(&w.config.dead_letter_stream).await.unwrap(), 1);

    w.store
        .stream_create_group(&w.config.dead_letter_stream, "inspect")
        .await
        .unwrap();
    let dead = w
        .store
        .stream_read_group(&w.config.dead_letter_stream, "inspect", "ops", ReadCursor::New, 1, None)
        .await
        .unwrap();
    assert_eq!(dead[0].field("userId"), Some("7"));
    assert_eq!(dead[0].field("attempts"), Some("3"));
    assert!(dead[0].field("error").unwrap().contains("injected commit failure"));
}

#[tokio::test]
async fn test_poison_entry_goes_straight_to_dead_letter() {
    let w = world(1).await;
    let consumer = w.consumer(w.config.clone());
    consumer.ensure_group().await.unwrap();
    w.store
        .stream_add(&w.config.stream, &vec![("userId".to_string(), "not-a-number".to_string())])
        .await
        .unwrap();

    assert_eq!(consumer.poll_once().await.unwrap(), Some(ProcessOutcome::DeadLettered));
    assert_eq!(w.store.stream_pending(&w.config.stream, &w.config.group).await.unwrap(), 0);
    assert_eq!(w.store.stream_len(&w.config.dead_letter_stream).await.unwrap(), 1);
}

#[tokio::test]
async fn test_end_to_end_single_unit_two_buyers() {
    let w = world(1).await;
    let consumer = Arc::new(w.consumer(w.config.clone()));
    consumer.ensure_group().await.unwrap();
    let shutdown = CancellationToken::new();
    let worker = {
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let (a, b) = tokio::join!(w.gate.admit(VOUCHER, 1), w.gate.admit(VOUCHER, 2));
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| o.is_admitted()).count(), 1);
    assert!(outcomes.contains(&AdmissionOutcome::Rejected(Rejection::OutOfStock)));

    let mut persisted = Vec::new();
    for _ in 0..200 {
        persisted = w.repository.orders().await;
        if !persisted.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(persisted.len(), 1);
    let winner = outcomes.iter().find_map(|o| o.order_id()).unwrap();
    assert_eq!(persisted[0].id, winner);

    shutdown.cancel();
    worker.await.unwrap();
    assert_eq!(w.repository.stock(VOUCHER).await, Some(0));
}
