//! Token issuance, verification, and refresh rotation.
//!
//! Access and refresh tokens are HS256 JWTs signed with separate secrets.
//! Both are hashed with SHA-256 before they touch the database, so a leaked
//! backup never yields a usable token. Refresh tokens rotate on use: the
//! stored record is claimed (deleted) before a replacement is issued, and a
//! well-signed refresh token whose record is already gone is treated as a
//! replay, revoking every session the subject holds.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::store::{CredentialStore, RefreshTokenRecord, SessionRecord, UserRecord};

use super::types::{ClientMeta, TokenPair};
use super::utils::hash_token;

/// Claims carried by an access token. `sid` names the backing session so a
/// single session can be revoked from the token alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    pub role: String,
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RefreshClaims {
    sub: Uuid,
    iat: i64,
    exp: i64,
    jti: String,
}

pub struct TokenService {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
}

impl TokenService {
    #[must_use]
    pub fn new(config: AuthConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self { config, store }
    }

    /// Mint an access/refresh pair for `user` and persist the backing
    /// session and refresh-token rows.
    pub async fn issue_pair(
        &self,
        user: &UserRecord,
        client: &ClientMeta,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let session_id = Uuid::new_v4();
        let access_ttl = self.config.access_token_ttl_seconds();
        let refresh_ttl = self.config.refresh_token_ttl_seconds();

        let access_claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role.clone(),
            sid: session_id,
            iat: now.timestamp(),
            exp: now.timestamp() + access_ttl,
            jti: Uuid::new_v4().to_string(),
        };
        let access_token = encode_hs256(&access_claims, self.config.access_token_secret())?;

        let refresh_claims = RefreshClaims {
            sub: user.id,
            iat: now.timestamp(),
            exp: now.timestamp() + refresh_ttl,
            jti: Uuid::new_v4().to_string(),
        };
        let refresh_token = encode_hs256(&refresh_claims, self.config.refresh_token_secret())?;

        let session = SessionRecord {
            id: session_id,
            user_id: user.id,
            access_token_hash: hash_token(&access_token),
            refresh_token_hash: hash_token(&refresh_token),
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: now + Duration::seconds(access_ttl),
            created_at: now,
        };
        self.store.create_session(&session).await?;

        let refresh_record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            session_id,
            token_hash: hash_token(&refresh_token),
            expires_at: now + Duration::seconds(refresh_ttl),
            created_at: now,
        };
        self.store.create_refresh_token(&refresh_record).await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in_seconds: access_ttl,
        })
    }

    /// Validate an access token and require its backing session to still be
    /// alive. A well-signed token without a session row has been revoked.
    pub async fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims: AccessClaims = decode_hs256(token, self.config.access_token_secret())?;
        if self
            .store
            .find_session_by_access_hash(&hash_token(token))
            .await?
            .is_none()
        {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Consume a refresh token and mint the replacement pair.
    ///
    /// The stored record is claimed before anything new is issued, so each
    /// refresh token rotates at most once. A valid signature whose record is
    /// gone means the token was already spent: the subject's sessions are
    /// all revoked before the error surfaces.
    pub async fn rotate_refresh(
        &self,
        refresh_token: &str,
        client: &ClientMeta,
    ) -> Result<TokenPair, AuthError> {
        let claims: RefreshClaims = decode_hs256(refresh_token, self.config.refresh_token_secret())?;

        let Some(record) = self
            .store
            .take_refresh_token(&hash_token(refresh_token))
            .await?
        else {
            warn!(user_id = %claims.sub, "refresh token replay detected, revoking all sessions");
            self.revoke_all_sessions(claims.sub).await?;
            return Err(AuthError::Reused);
        };

        if record.expires_at <= Utc::now() {
            return Err(AuthError::Expired);
        }

        self.store
            .delete_session(record.user_id, record.session_id)
            .await?;

        let user = self
            .store
            .find_user_by_id(record.user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        self.issue_pair(&user, client).await
    }

    /// Revoke one session. Revoking an already-dead session succeeds.
    pub async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AuthError> {
        self.store.delete_session(user_id, session_id).await?;
        Ok(())
    }

    /// Revoke every session and refresh token the user holds, returning the
    /// number of sessions removed.
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let removed = self.store.delete_sessions_for_user(user_id).await?;
        self.store.delete_refresh_tokens_for_user(user_id).await?;
        Ok(removed)
    }
}

fn encode_hs256<T: Serialize>(claims: &T, secret: &SecretString) -> Result<String, AuthError> {
    jsonwebtoken::encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|err| AuthError::Internal(anyhow!("failed to sign token: {err}")))
}

fn decode_hs256<T: DeserializeOwned>(token: &str, secret: &SecretString) -> Result<T, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // No leeway: a token expired by one second is already invalid.
    validation.leeway = 0;
    jsonwebtoken::decode::<T>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Unauthenticated,
    })
}
