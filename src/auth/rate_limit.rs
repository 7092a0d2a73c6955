//! Sliding-window rate limiting shared across server instances.
//!
//! Each (policy, client) pair owns a sorted set of request timestamps in the
//! fast KV store, keyed `rate_limit:<policy>:<client>`. A check prunes
//! entries older than the window, records the current request, refreshes the
//! key TTL, and counts what remains. The limiter is advisory: when the KV
//! store is unreachable it fails open, so sign-in availability never hinges
//! on the limiter backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::kv::KvStore;

/// Allowed request count for one named surface over one window.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: u64,
}

/// Login, registration, and password changes.
pub const AUTH: RateLimitPolicy = RateLimitPolicy {
    name: "auth",
    window: Duration::from_secs(15 * 60),
    max_requests: 5,
};

/// Reset-link requests and reset-token consumption.
pub const PASSWORD_RESET: RateLimitPolicy = RateLimitPolicy {
    name: "password_reset",
    window: Duration::from_secs(60 * 60),
    max_requests: 3,
};

/// Authenticated traffic: refresh, logout, verification, two-factor.
pub const GENERAL_API: RateLimitPolicy = RateLimitPolicy {
    name: "general",
    window: Duration::from_secs(15 * 60),
    max_requests: 100,
};

/// Content-creation endpoints of the host application.
pub const RESOURCE_CREATION: RateLimitPolicy = RateLimitPolicy {
    name: "resource_creation",
    window: Duration::from_secs(60 * 60),
    max_requests: 20,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, policy: &RateLimitPolicy, client_key: &str) -> RateLimitDecision;
}

/// Limiter that always allows. Useful for tests and single-tenant setups.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check(&self, _policy: &RateLimitPolicy, _client_key: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

pub struct SlidingWindowLimiter {
    kv: Arc<dyn KvStore>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn observe(&self, key: &str, policy: &RateLimitPolicy) -> anyhow::Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = i64::try_from(policy.window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);

        self.kv.zremrangebyscore(key, 0.0, cutoff as f64).await?;
        // Unique members keep same-millisecond requests from collapsing into
        // one sorted-set entry.
        let member = format!("{now_ms}:{}", Uuid::new_v4());
        self.kv.zadd(key, &member, now_ms as f64).await?;
        self.kv.expire(key, policy.window).await?;
        self.kv.zcard(key).await
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, policy: &RateLimitPolicy, client_key: &str) -> RateLimitDecision {
        let key = format!("rate_limit:{}:{client_key}", policy.name);
        match self.observe(&key, policy).await {
            Ok(count) if count > policy.max_requests => RateLimitDecision::Limited {
                retry_after_seconds: policy.window.as_secs(),
            },
            Ok(_) => RateLimitDecision::Allowed,
            Err(err) => {
                warn!(policy = policy.name, "rate limiter unavailable, allowing request: {err}");
                RateLimitDecision::Allowed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use anyhow::bail;

    const TEST_POLICY: RateLimitPolicy = RateLimitPolicy {
        name: "test",
        window: Duration::from_secs(60),
        max_requests: 3,
    };

    fn limiter() -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn noop_always_allows() {
        let limiter = NoopRateLimiter;
        for _ in 0..100 {
            assert_eq!(
                limiter.check(&AUTH, "203.0.113.1").await,
                RateLimitDecision::Allowed
            );
        }
    }

    #[tokio::test]
    async fn requests_over_the_cap_are_limited() {
        let limiter = limiter();
        for _ in 0..3 {
            assert_eq!(
                limiter.check(&TEST_POLICY, "203.0.113.1").await,
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check(&TEST_POLICY, "203.0.113.1").await,
            RateLimitDecision::Limited {
                retry_after_seconds: 60
            }
        );
    }

    #[tokio::test]
    async fn window_slides_as_old_entries_expire() {
        let limiter = limiter();
        let policy = RateLimitPolicy {
            name: "short",
            window: Duration::from_millis(50),
            max_requests: 2,
        };
        for _ in 0..2 {
            assert_eq!(
                limiter.check(&policy, "203.0.113.1").await,
                RateLimitDecision::Allowed
            );
        }
        assert!(matches!(
            limiter.check(&policy, "203.0.113.1").await,
            RateLimitDecision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            limiter.check(&policy, "203.0.113.1").await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn clients_do_not_share_windows() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.check(&TEST_POLICY, "203.0.113.1").await;
        }
        assert!(matches!(
            limiter.check(&TEST_POLICY, "203.0.113.1").await,
            RateLimitDecision::Limited { .. }
        ));
        assert_eq!(
            limiter.check(&TEST_POLICY, "203.0.113.2").await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn policies_do_not_share_windows() {
        let limiter = limiter();
        let other = RateLimitPolicy {
            name: "other",
            window: Duration::from_secs(60),
            max_requests: 3,
        };
        for _ in 0..3 {
            limiter.check(&TEST_POLICY, "203.0.113.1").await;
        }
        assert!(matches!(
            limiter.check(&TEST_POLICY, "203.0.113.1").await,
            RateLimitDecision::Limited { .. }
        ));
        assert_eq!(
            limiter.check(&other, "203.0.113.1").await,
            RateLimitDecision::Allowed
        );
    }

    struct FailingKv;

    #[async_trait]
    impl KvStore for FailingKv {
        async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            bail!("kv down")
        }

        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> anyhow::Result<()> {
            bail!("kv down")
        }

        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            bail!("kv down")
        }

        async fn delete(&self, _key: &str) -> anyhow::Result<bool> {
            bail!("kv down")
        }

        async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> anyhow::Result<()> {
            bail!("kv down")
        }

        async fn zremrangebyscore(
            &self,
            _key: &str,
            _min: f64,
            _max: f64,
        ) -> anyhow::Result<u64> {
            bail!("kv down")
        }

        async fn zcard(&self, _key: &str) -> anyhow::Result<u64> {
            bail!("kv down")
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> anyhow::Result<()> {
            bail!("kv down")
        }
    }

    #[tokio::test]
    async fn fails_open_when_the_store_is_unreachable() {
        let limiter = SlidingWindowLimiter::new(Arc::new(FailingKv));
        assert_eq!(
            limiter.check(&AUTH, "203.0.113.1").await,
            RateLimitDecision::Allowed
        );
    }
}
