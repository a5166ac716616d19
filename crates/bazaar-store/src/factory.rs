use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryStore;
use crate::redis_store::RedisStore;
use crate::traits::KeyValueStore;

/// Create a store based on configuration.
///
/// ## Store Modes
///
/// - **Redis disabled**: in-process [`InMemoryStore`] (single instance only)
/// - **Redis enabled**: pooled [`RedisStore`], verified with a `PING`
///
/// Unlike a plain cache, locks and seckill inventory are only correct when
/// every instance shares one store, so an unreachable Redis is an error
/// instead of a silent fallback to local memory.
pub async fn create_store(config: &RedisConfig) -> StoreResult<Arc<dyn KeyValueStore>> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| StoreError::unavailable(format!("failed to create Redis pool: {e}")))?;

    let store = RedisStore::new(pool);
    store.ping().await?;
    tracing::info!("Connected to Redis");

    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_redis_uses_memory() {
        let store = create_store(&RedisConfig::default()).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = RedisConfig {
            enabled: true,
            url: " ".into(),
            ..RedisConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RedisConfig::default().validate().is_ok());
    }
}
