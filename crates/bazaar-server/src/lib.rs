//! Bazaar service wiring.
//!
//! Every component is built once from [`AppConfig`] and shared through
//! [`Services`]; nothing lives in globals. The binary owns the lifecycle of
//! the order queue consumer.

pub mod config;
pub mod metrics;
pub mod observability;

use std::sync::Arc;

use bazaar_cache::CacheClient;
use bazaar_core::{SharedClock, SystemClock};
use bazaar_seckill::{AdmissionGate, OrderQueueConsumer, OrderRepository};
use bazaar_store::{KeyValueStore, create_store};
use bazaar_sync::{DistributedLock, IdGenerator};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use config::AppConfig;

/// The consistency-layer components of one process.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn KeyValueStore>,
    pub clock: SharedClock,
    pub ids: IdGenerator,
    pub locks: DistributedLock,
    pub cache: CacheClient,
    pub gate: AdmissionGate,
    pub consumer: Arc<OrderQueueConsumer>,
}

impl Services {
    /// Connects the store described by `config.redis` and builds every
    /// component on top of it.
    pub async fn connect(
        config: &AppConfig,
        repository: Arc<dyn OrderRepository>,
    ) -> anyhow::Result<Self> {
        let store = create_store(&config.redis).await?;
        Ok(Self::with_store(config, store, Arc::new(SystemClock), repository))
    }

    pub fn with_store(
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
        clock: SharedClock,
        repository: Arc<dyn OrderRepository>,
    ) -> Self {
        let ids = IdGenerator::new(store.clone(), clock.clone());
        let locks = DistributedLock::new(store.clone());
        let cache = CacheClient::new(
            store.clone(),
            locks.clone(),
            clock.clone(),
            config.cache.clone(),
        );
        let gate = AdmissionGate::new(
            store.clone(),
            ids.clone(),
            clock.clone(),
            config.seckill.stream.clone(),
        );
        let consumer = Arc::new(OrderQueueConsumer::new(
            store.clone(),
            locks.clone(),
            repository,
            clock.clone(),
            config.seckill.clone(),
        ));

        tracing::info!(
            backend = store.backend_name(),
            instance = locks.instance_id(),
            consumer = consumer.consumer_name(),
            "Services initialized"
        );

        Self {
            store,
            clock,
            ids,
            locks,
            cache,
            gate,
            consumer,
        }
    }

    /// Ensures the consumer group exists and runs the order queue consumer
    /// until `shutdown` is cancelled.
    pub async fn spawn_consumer(
        &self,
        shutdown: CancellationToken,
    ) -> anyhow::Result<JoinHandle<()>> {
        self.consumer.ensure_group().await?;
        let consumer = self.consumer.clone();
        Ok(tokio::spawn(async move { consumer.run(shutdown).await }))
    }
}
