//! Redis-backed [`KvStore`] on a shared multiplexed connection.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tracing::Instrument;

use super::KvStore;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(400);

/// Redis implementation of [`KvStore`].
///
/// Every command runs under a short timeout so a stalled node surfaces as an
/// error instead of holding auth requests open. The rate limiter turns that
/// error into a fail-open allow; token and reset flows fail closed.
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisKv {
    #[must_use]
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Connect to `redis_url` with a managed connection that reconnects on
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection
    /// cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self::new(manager))
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn run<T, F>(&self, operation: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let span = tracing::info_span!(
            "kv.command",
            kv.system = "redis",
            kv.operation = operation
        );
        match tokio::time::timeout(self.command_timeout, future.instrument(span)).await {
            Ok(result) => result.with_context(|| format!("redis {operation} failed")),
            Err(_) => Err(anyhow!(
                "redis {operation} timed out after {:?}",
                self.command_timeout
            )),
        }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        self.run("SET", async move { conn.set::<_, _, ()>(key, value).await })
            .await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        self.run("SETEX", async move {
            conn.set_ex::<_, _, ()>(key, value, seconds).await
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        self.run("GET", async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed = self
            .run("DEL", async move { conn.del::<_, i64>(key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        self.run("ZADD", async move {
            conn.zadd::<_, _, _, ()>(key, member, score).await
        })
        .await
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.manager.clone();
        self.run("ZREMRANGEBYSCORE", async move {
            conn.zrembyscore::<_, _, _, u64>(key, min, max).await
        })
        .await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.manager.clone();
        self.run("ZCARD", async move { conn.zcard::<_, u64>(key).await })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        self.run("EXPIRE", async move {
            conn.expire::<_, bool>(key, seconds).await.map(|_| ())
        })
        .await
    }
}
