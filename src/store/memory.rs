//! In-memory [`CredentialStore`] used by tests and local development.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CreateUserOutcome, CredentialStore, NewUser, RefreshTokenRecord, SessionRecord, UserRecord,
};

#[derive(Default)]
struct MemoryStoreInner {
    users: HashMap<Uuid, UserRecord>,
    sessions: HashMap<Uuid, SessionRecord>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
}

/// Process-local [`CredentialStore`]. One mutex guards all three maps so
/// multi-step operations stay atomic the same way the SQL statements do.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_user(&self, new_user: &NewUser) -> Result<CreateUserOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.users.values().any(|user| user.email == new_user.email) {
            return Ok(CreateUserOutcome::DuplicateEmail);
        }
        if inner
            .users
            .values()
            .any(|user| user.username == new_user.username)
        {
            return Ok(CreateUserOutcome::DuplicateUsername);
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            email: new_user.email.clone(),
            username: new_user.username.clone(),
            password_hash: new_user.password_hash.clone(),
            role: new_user.role.clone(),
            email_verified: false,
            failed_login_count: 0,
            lockout_until: None,
            created_at: Utc::now(),
        };
        inner.users.insert(record.id, record.clone());
        Ok(CreateUserOutcome::Created(record))
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn set_email_verified(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.email_verified = true;
        }
        Ok(())
    }

    async fn increment_failed_logins(&self, user_id: Uuid) -> Result<i32> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("user not found"))?;
        user.failed_login_count += 1;
        Ok(user.failed_login_count)
    }

    async fn set_lockout(&self, user_id: Uuid, until: Option<DateTime<Utc>>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.lockout_until = until;
        }
        Ok(())
    }

    async fn clear_failed_logins(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.failed_login_count = 0;
        }
        Ok(())
    }

    async fn create_session(&self, session: &SessionRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session_by_access_hash(
        &self,
        access_token_hash: &str,
    ) -> Result<Option<SessionRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .find(|session| {
                session.access_token_hash == access_token_hash && session.expires_at > Utc::now()
            })
            .cloned())
    }

    async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let existed = inner
            .sessions
            .get(&session_id)
            .is_some_and(|session| session.user_id == user_id);
        if existed {
            inner.sessions.remove(&session_id);
        }
        inner
            .refresh_tokens
            .retain(|_, token| !(token.session_id == session_id && token.user_id == user_id));
        Ok(existed)
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, session| session.user_id != user_id);
        let removed = before - inner.sessions.len();
        inner
            .refresh_tokens
            .retain(|_, token| token.user_id != user_id);
        Ok(removed as u64)
    }

    async fn create_refresh_token(&self, token: &RefreshTokenRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.refresh_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn take_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        // All callers race through the same lock; exactly one observes the row.
        let mut inner = self.inner.lock().await;
        let id = inner
            .refresh_tokens
            .values()
            .find(|token| token.token_hash == token_hash)
            .map(|token| token.id);
        Ok(id.and_then(|id| inner.refresh_tokens.remove(&id)))
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.refresh_tokens.len();
        inner
            .refresh_tokens
            .retain(|_, token| token.user_id != user_id);
        Ok((before - inner.refresh_tokens.len()) as u64)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let tokens_before = inner.refresh_tokens.len();
        inner.refresh_tokens.retain(|_, token| token.expires_at > now);
        let mut removed = tokens_before - inner.refresh_tokens.len();

        // Sessions still anchoring a refresh token stay.
        let anchored: HashSet<Uuid> = inner
            .refresh_tokens
            .values()
            .map(|token| token.session_id)
            .collect();
        let sessions_before = inner.sessions.len();
        inner
            .sessions
            .retain(|id, session| session.expires_at > now || anchored.contains(id));
        removed += sessions_before - inner.sessions.len();
        Ok(removed as u64)
    }
}
