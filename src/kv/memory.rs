//! In-memory [`KvStore`] with lazy TTL expiry.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::KvStore;

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct SortedSetEntry {
    members: HashMap<String, f64>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct MemoryKvInner {
    strings: HashMap<String, StringEntry>,
    sorted_sets: HashMap<String, SortedSetEntry>,
}

/// Process-local [`KvStore`]. Expired entries are dropped on access; nothing
/// sweeps in the background.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<MemoryKvInner>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn expired(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|at| at <= Instant::now())
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.strings.get(key)
            && expired(entry.expires_at)
        {
            inner.strings.remove(key);
            return Ok(None);
        }
        Ok(inner.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let mut removed = false;
        if let Some(entry) = inner.strings.remove(key) {
            removed = !expired(entry.expires_at);
        }
        if let Some(entry) = inner.sorted_sets.remove(key) {
            removed = removed || !expired(entry.expires_at);
        }
        Ok(removed)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.sorted_sets.entry(key.to_string()).or_default();
        if expired(entry.expires_at) {
            entry.members.clear();
            entry.expires_at = None;
        }
        entry.members.insert(member.to_string(), score);
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        if expired(entry.expires_at) {
            inner.sorted_sets.remove(key);
            return Ok(0);
        }
        let before = entry.members.len();
        entry
            .members
            .retain(|_, score| *score < min || *score > max);
        Ok((before - entry.members.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.sorted_sets.get(key) else {
            return Ok(0);
        };
        if expired(entry.expires_at) {
            inner.sorted_sets.remove(key);
            return Ok(0);
        }
        Ok(entry.members.len() as u64)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let deadline = Instant::now() + ttl;
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        if let Some(entry) = inner.sorted_sets.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{KvStore, MemoryKv};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn set_get_round_trip() {
        let kv = MemoryKv::new();
        kv.set("greeting", "hello").await.unwrap();
        assert_eq!(kv.get("greeting").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_lazily() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("short", "lived", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(kv.get("short").await.unwrap().as_deref(), Some("lived"));
        sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let kv = MemoryKv::new();
        kv.set("once", "1").await.unwrap();
        assert!(kv.delete("once").await.unwrap());
        assert!(!kv.delete("once").await.unwrap());
    }

    #[tokio::test]
    async fn delete_of_expired_key_reports_absent() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("gone", "1", Duration::ZERO).await.unwrap();
        assert!(!kv.delete("gone").await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_prunes_by_score() {
        let kv = MemoryKv::new();
        kv.zadd("window", "a", 1.0).await.unwrap();
        kv.zadd("window", "b", 2.0).await.unwrap();
        kv.zadd("window", "c", 3.0).await.unwrap();
        assert_eq!(kv.zcard("window").await.unwrap(), 3);

        let removed = kv.zremrangebyscore("window", 0.0, 2.0).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(kv.zcard("window").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expire_applies_to_sorted_sets() {
        let kv = MemoryKv::new();
        kv.zadd("window", "a", 1.0).await.unwrap();
        kv.expire("window", Duration::from_millis(10)).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.zcard("window").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zadd_resets_expired_sets() {
        let kv = MemoryKv::new();
        kv.zadd("window", "a", 1.0).await.unwrap();
        kv.expire("window", Duration::ZERO).await.unwrap();
        kv.zadd("window", "b", 2.0).await.unwrap();
        assert_eq!(kv.zcard("window").await.unwrap(), 1);
    }
}
