//! Redis shared tier over a deadpool connection pool.

use super::backend::CacheBackend;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use std::time::Duration;

pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    pub fn new(url: &str, pool_max: usize) -> Result<Self> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(pool_max.max(1)));
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            Error::configuration_with_context(
                "failed to create redis pool",
                ErrorContext::new()
                    .with_field_path("cache.redis_url")
                    .with_details(e.to_string())
                    .with_source("redis_backend"),
            )
        })?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| redis_error("pool checkout", e))
    }
}

fn redis_error(op: &str, e: impl std::fmt::Display) -> Error {
    Error::cache_with_context(
        format!("redis {} failed", op),
        ErrorContext::new()
            .with_details(e.to_string())
            .with_source("redis_backend"),
    )
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| redis_error("GET", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, secs)
            .await
            .map_err(|e| redis_error("SETEX", e))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
