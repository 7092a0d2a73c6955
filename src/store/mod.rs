//! Credential store seam: users, sessions, and refresh tokens.
//!
//! The platform's relational database sits behind [`CredentialStore`].
//! [`PgStore`] is the production adapter; [`MemoryStore`] is the in-process
//! double used by tests. The security core never deletes user rows, only the
//! session and refresh-token rows it owns.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A platform account as seen by the security core.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub email_verified: bool,
    pub failed_login_count: i32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

/// Outcome of a user insert. Duplicates are detected by the store itself so
/// the check and the insert cannot race across instances.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(UserRecord),
    DuplicateEmail,
    DuplicateUsername,
}

/// One live (access, refresh) token pair. Deleting the row revokes the pair
/// ahead of its expiry.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A live refresh token. Absence from the store is the only revoked state.
#[derive(Clone, Debug)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_user(&self, new_user: &NewUser) -> Result<CreateUserOutcome>;

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<()>;

    async fn set_email_verified(&self, user_id: Uuid) -> Result<()>;

    /// Atomically bump the failed-login counter, returning the new value.
    async fn increment_failed_logins(&self, user_id: Uuid) -> Result<i32>;

    async fn set_lockout(&self, user_id: Uuid, until: Option<DateTime<Utc>>) -> Result<()>;

    async fn clear_failed_logins(&self, user_id: Uuid) -> Result<()>;

    async fn create_session(&self, session: &SessionRecord) -> Result<()>;

    /// Look up a live, unexpired session by access-token hash.
    async fn find_session_by_access_hash(
        &self,
        access_token_hash: &str,
    ) -> Result<Option<SessionRecord>>;

    /// Delete one session and its refresh tokens. Reports whether a session
    /// row existed; deleting an absent session is not an error.
    async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> Result<bool>;

    /// Delete every session (and associated refresh token) for a user,
    /// returning the number of sessions removed.
    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64>;

    async fn create_refresh_token(&self, token: &RefreshTokenRecord) -> Result<()>;

    /// Atomically remove and return the refresh token with `token_hash`.
    /// Under concurrent rotation exactly one caller receives the record.
    async fn take_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    async fn delete_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64>;

    /// Delete rows past their stored expiry: spent refresh tokens first, then
    /// sessions that no longer anchor a live refresh token. A session whose
    /// own deadline has passed is kept while its refresh token lives, so an
    /// idle pair can still rotate. Returns the number of rows removed.
    async fn cleanup_expired(&self) -> Result<u64>;
}
