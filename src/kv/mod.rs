//! Fast key-value store seam.
//!
//! Rate-limit windows, reset and verification tokens, and two-factor secrets
//! live behind this trait. [`RedisKv`] is the production implementation;
//! [`MemoryKv`] backs tests and single-process setups.

mod memory;
mod redis;

pub use memory::MemoryKv;
pub use redis::RedisKv;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a key, reporting whether a live key was removed. The boolean is
    /// the single-use gate for reset and verification tokens: whichever
    /// caller observes `true` owns the token.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add `member` to the sorted set at `key`, overwriting its score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Remove members of the sorted set whose score falls in `[min, max]`.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}
