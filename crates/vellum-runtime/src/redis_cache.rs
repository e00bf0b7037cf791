//! Redis-backed query cache.
//!
//! Every Vellum cache lives in its own Redis database, selected through the connection
//! URL, so a flush is a `FLUSHDB` on that database.

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, info, instrument, warn};
use vellum_query::{CacheClient, CacheError};

use crate::config::RedisConfig;
use crate::error::{Result, RuntimeError};

/// Builds a connection pool. No connection is opened until first use.
pub fn create_redis_pool(config: &RedisConfig) -> Result<Pool> {
    let mut redis_config = Config::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(config.timeout());
    pool_config.timeouts.create = Some(config.timeout());
    pool_config.timeouts.recycle = Some(config.timeout());
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RuntimeError::cache(format!("failed to create Redis pool: {e}")))
}

#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisCache")
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the pool and checks that a connection can be established.
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let pool = create_redis_pool(config)?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| RuntimeError::cache(format!("failed to connect to Redis: {e}")))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RuntimeError::cache(format!("Redis PING failed: {e}")))?;
        info!("Connected to Redis");
        Ok(Self::new(pool))
    }

    async fn connection(&self) -> std::result::Result<deadpool_redis::Connection, CacheError> {
        self.pool.get().await.map_err(|e| {
            warn!(error = %e, "Failed to get Redis connection");
            CacheError::Connection(e.to_string())
        })
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> std::result::Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn flush_db(&self) -> std::result::Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        debug!("Flushed Redis query cache");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> RedisConfig {
        RedisConfig {
            url: "redis://127.0.0.1:1/0".into(),
            pool_size: 2,
            timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn test_pool_is_created_lazily() {
        let pool = create_redis_pool(&unreachable()).unwrap();
        assert_eq!(pool.status().max_size, 2);
        assert_eq!(pool.status().size, 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_connection_errors() {
        let cache = RedisCache::new(create_redis_pool(&unreachable()).unwrap());
        assert_eq!(cache.backend_name(), "redis");
        assert!(matches!(
            cache.get("products:all").await,
            Err(CacheError::Connection(_))
        ));
        assert!(RedisCache::connect(&unreachable()).await.is_err());
    }
}
