//! Failed-login lockout guard.
//!
//! Counters and lock deadlines live on the user row, so every server
//! instance sees the same state. Locks expire lazily: the first check after
//! the deadline clears the row instead of a background sweeper.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::store::CredentialStore;

/// Result of recording one failed attempt.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FailureOutcome {
    pub locked: bool,
    pub attempts_remaining: i32,
    pub retry_after_seconds: u64,
}

/// Lock state reported before any credential check runs.
#[derive(Clone, Copy, Debug)]
pub(crate) enum LockState {
    Unlocked,
    Locked { retry_after_seconds: u64 },
}

pub(crate) struct LockoutGuard {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
}

impl LockoutGuard {
    pub(crate) fn new(config: AuthConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self { config, store }
    }

    /// Report whether the account is locked, clearing a lapsed lock in the
    /// same call.
    pub(crate) async fn check(
        &self,
        user_id: Uuid,
        lockout_until: Option<DateTime<Utc>>,
    ) -> Result<LockState, AuthError> {
        let Some(until) = lockout_until else {
            return Ok(LockState::Unlocked);
        };
        let now = Utc::now();
        if until > now {
            let retry_after_seconds = u64::try_from((until - now).num_seconds())
                .unwrap_or(0)
                .max(1);
            return Ok(LockState::Locked { retry_after_seconds });
        }
        self.store.set_lockout(user_id, None).await?;
        Ok(LockState::Unlocked)
    }

    /// Count one failed attempt; the attempt that reaches the threshold
    /// locks the account for the configured cooldown.
    pub(crate) async fn record_failure(&self, user_id: Uuid) -> Result<FailureOutcome, AuthError> {
        let attempts = self.store.increment_failed_logins(user_id).await?;
        if attempts >= self.config.max_failed_logins() {
            let until = Utc::now() + Duration::seconds(self.config.lockout_seconds());
            self.store.set_lockout(user_id, Some(until)).await?;
            // The lock replaces the counter; the next window starts from zero.
            self.store.clear_failed_logins(user_id).await?;
            info!(%user_id, "account locked after repeated failed logins");
            return Ok(FailureOutcome {
                locked: true,
                attempts_remaining: 0,
                retry_after_seconds: u64::try_from(self.config.lockout_seconds()).unwrap_or(0),
            });
        }
        Ok(FailureOutcome {
            locked: false,
            attempts_remaining: self.config.max_failed_logins() - attempts,
            retry_after_seconds: 0,
        })
    }

    /// A successful login resets both the counter and any stale deadline.
    pub(crate) async fn clear_on_success(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.store.clear_failed_logins(user_id).await?;
        self.store.set_lockout(user_id, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CreateUserOutcome, MemoryStore, NewUser};
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "http://localhost:3000".to_string(),
            SecretString::from("access-secret"),
            SecretString::from("refresh-secret"),
        )
    }

    async fn seeded_user(store: &MemoryStore) -> Uuid {
        let outcome = store
            .create_user(&NewUser {
                email: "alice@example.com".to_string(),
                username: "alice".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                role: "user".to_string(),
            })
            .await
            .unwrap();
        match outcome {
            CreateUserOutcome::Created(user) => user.id,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn locks_on_the_fifth_failure() {
        let store = Arc::new(MemoryStore::new());
        let user_id = seeded_user(&store).await;
        let guard = LockoutGuard::new(config(), Arc::clone(&store) as Arc<dyn CredentialStore>);

        for expected_remaining in (1..=4).rev() {
            let outcome = guard.record_failure(user_id).await.unwrap();
            assert!(!outcome.locked);
            assert_eq!(outcome.attempts_remaining, expected_remaining);
        }

        let outcome = guard.record_failure(user_id).await.unwrap();
        assert!(outcome.locked);
        assert_eq!(outcome.retry_after_seconds, 900);

        let user = store.find_user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.failed_login_count, 0);
        assert!(user.lockout_until.is_some());
    }

    #[tokio::test]
    async fn check_reports_active_lock() {
        let store = Arc::new(MemoryStore::new());
        let user_id = seeded_user(&store).await;
        let guard = LockoutGuard::new(config(), Arc::clone(&store) as Arc<dyn CredentialStore>);

        let until = Utc::now() + Duration::seconds(600);
        store.set_lockout(user_id, Some(until)).await.unwrap();

        match guard.check(user_id, Some(until)).await.unwrap() {
            LockState::Locked { retry_after_seconds } => {
                assert!(retry_after_seconds > 0 && retry_after_seconds <= 600);
            }
            LockState::Unlocked => panic!("expected active lock"),
        }
    }

    #[tokio::test]
    async fn lapsed_lock_is_cleared_on_check() {
        let store = Arc::new(MemoryStore::new());
        let user_id = seeded_user(&store).await;
        let guard = LockoutGuard::new(config(), Arc::clone(&store) as Arc<dyn CredentialStore>);

        let until = Utc::now() - Duration::seconds(1);
        store.set_lockout(user_id, Some(until)).await.unwrap();

        assert!(matches!(
            guard.check(user_id, Some(until)).await.unwrap(),
            LockState::Unlocked
        ));
        let user = store.find_user_by_id(user_id).await.unwrap().unwrap();
        assert!(user.lockout_until.is_none());
    }

    #[tokio::test]
    async fn success_resets_counter_and_deadline() {
        let store = Arc::new(MemoryStore::new());
        let user_id = seeded_user(&store).await;
        let guard = LockoutGuard::new(config(), Arc::clone(&store) as Arc<dyn CredentialStore>);

        guard.record_failure(user_id).await.unwrap();
        guard.record_failure(user_id).await.unwrap();
        guard.clear_on_success(user_id).await.unwrap();

        let user = store.find_user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.failed_login_count, 0);
        assert!(user.lockout_until.is_none());

        // The counter starts over after a reset.
        let outcome = guard.record_failure(user_id).await.unwrap();
        assert_eq!(outcome.attempts_remaining, 4);
    }
}
