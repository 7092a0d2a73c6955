//! PostgreSQL credential store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    CreateUserOutcome, CredentialStore, NewUser, RefreshTokenRecord, SessionRecord, UserRecord,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        email_verified: row.get("email_verified"),
        failed_login_count: row.get("failed_login_count"),
        lockout_until: row.get("lockout_until"),
        created_at: row.get("created_at"),
    }
}

fn session_from_row(row: &PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        access_token_hash: row.get("access_token_hash"),
        refresh_token_hash: row.get("refresh_token_hash"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn refresh_from_row(row: &PgRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        token_hash: row.get("token_hash"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn unique_violation_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err)
            if db_err.code().is_some_and(|code| code.as_ref() == "23505") =>
        {
            db_err.constraint().map(ToString::to_string)
        }
        _ => None,
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_user(&self, new_user: &NewUser) -> Result<CreateUserOutcome> {
        let query = r"
            INSERT INTO users (email, username, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, username, password_hash, role, email_verified,
                      failed_login_count, lockout_until, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&new_user.email)
            .bind(&new_user.username)
            .bind(&new_user.password_hash)
            .bind(&new_user.role)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row))),
            Err(err) => match unique_violation_constraint(&err).as_deref() {
                Some("users_email_key") => Ok(CreateUserOutcome::DuplicateEmail),
                Some("users_username_key") => Ok(CreateUserOutcome::DuplicateUsername),
                _ => Err(err).context("failed to insert user"),
            },
        }
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT id, email, username, password_hash, role, email_verified,
                   failed_login_count, lockout_until, created_at
            FROM users
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT id, email, username, password_hash, role, email_verified,
                   failed_login_count, lockout_until, created_at
            FROM users
            WHERE email = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT id, email, username, password_hash, role, email_verified,
                   failed_login_count, lockout_until, created_at
            FROM users
            WHERE username = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by username")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        let query = r"
            UPDATE users
            SET password_hash = $2,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update password hash")?;
        Ok(())
    }

    async fn set_email_verified(&self, user_id: Uuid) -> Result<()> {
        let query = r"
            UPDATE users
            SET email_verified = TRUE,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark email verified")?;
        Ok(())
    }

    async fn increment_failed_logins(&self, user_id: Uuid) -> Result<i32> {
        let query = r"
            UPDATE users
            SET failed_login_count = failed_login_count + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING failed_login_count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to increment failed logins")?;
        Ok(row.get("failed_login_count"))
    }

    async fn set_lockout(&self, user_id: Uuid, until: Option<DateTime<Utc>>) -> Result<()> {
        let query = r"
            UPDATE users
            SET lockout_until = $2,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(until)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set lockout")?;
        Ok(())
    }

    async fn clear_failed_logins(&self, user_id: Uuid) -> Result<()> {
        let query = r"
            UPDATE users
            SET failed_login_count = 0,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear failed logins")?;
        Ok(())
    }

    async fn create_session(&self, session: &SessionRecord) -> Result<()> {
        let query = r"
            INSERT INTO user_sessions
                (id, user_id, access_token_hash, refresh_token_hash,
                 ip_address, user_agent, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.access_token_hash)
            .bind(&session.refresh_token_hash)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.expires_at)
            .bind(session.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_session_by_access_hash(
        &self,
        access_token_hash: &str,
    ) -> Result<Option<SessionRecord>> {
        // Expired rows are treated as absent; nothing sweeps them eagerly.
        let query = r"
            SELECT id, user_id, access_token_hash, refresh_token_hash,
                   ip_address, user_agent, expires_at, created_at
            FROM user_sessions
            WHERE access_token_hash = $1
              AND expires_at > NOW()
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(access_token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        Ok(row.map(|row| session_from_row(&row)))
    }

    async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin session delete transaction")?;

        let query = "DELETE FROM refresh_tokens WHERE session_id = $1 AND user_id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_id)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete session refresh tokens")?;

        let query = "DELETE FROM user_sessions WHERE id = $1 AND user_id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete session")?;

        tx.commit().await.context("commit session delete")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin session purge transaction")?;

        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete user refresh tokens")?;

        let query = "DELETE FROM user_sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete user sessions")?;

        tx.commit().await.context("commit session purge")?;
        Ok(result.rows_affected())
    }

    async fn create_refresh_token(&self, token: &RefreshTokenRecord) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens
                (id, user_id, session_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token.id)
            .bind(token.user_id)
            .bind(token.session_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .bind(token.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn take_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        // The delete doubles as the single-use claim: only one rotation can
        // get the row back.
        let query = r"
            DELETE FROM refresh_tokens
            WHERE token_hash = $1
            RETURNING id, user_id, session_id, token_hash, expires_at, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume refresh token")?;
        Ok(row.map(|row| refresh_from_row(&row)))
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete user refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin expiry cleanup transaction")?;

        let query = "DELETE FROM refresh_tokens WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let tokens = sqlx::query(query)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete expired refresh tokens")?;

        // A session still anchoring a refresh token stays: deleting it would
        // cascade the token away and the next rotation would read as a
        // replay.
        let query = r"
            DELETE FROM user_sessions
            WHERE expires_at <= NOW()
              AND NOT EXISTS (
                  SELECT 1 FROM refresh_tokens
                  WHERE refresh_tokens.session_id = user_sessions.id
              )
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let sessions = sqlx::query(query)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete expired sessions")?;

        tx.commit().await.context("commit expiry cleanup")?;
        Ok(tokens.rows_affected() + sessions.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::{CredentialStore, NewUser, PgStore};
    use sqlx::PgPool;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
    use std::time::Duration;
    use uuid::Uuid;

    fn unreachable_pool() -> PgPool {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("invalid")
            .database("invalid")
            .ssl_mode(PgSslMode::Disable);
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options)
    }

    #[tokio::test]
    async fn find_user_errors_without_database() {
        let store = PgStore::new(unreachable_pool());
        assert!(store.find_user_by_id(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn create_user_errors_without_database() {
        let store = PgStore::new(unreachable_pool());
        let new_user = NewUser {
            email: "user@example.com".to_string(),
            username: "user".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "user".to_string(),
        };
        assert!(store.create_user(&new_user).await.is_err());
    }

    #[tokio::test]
    async fn take_refresh_token_errors_without_database() {
        let store = PgStore::new(unreachable_pool());
        assert!(store.take_refresh_token("hash").await.is_err());
    }

    #[tokio::test]
    async fn cleanup_expired_errors_without_database() {
        let store = PgStore::new(unreachable_pool());
        assert!(store.cleanup_expired().await.is_err());
    }
}
