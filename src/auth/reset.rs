//! Password-reset and email-verification token flows.
//!
//! Both flows mail a raw opaque token and store only its SHA-256 digest in
//! the fast KV store, under the flow's TTL. Consumption claims the token by
//! deleting the key: the delete is the single-use gate, so under concurrent
//! submission exactly one caller proceeds and the rest see an invalid token.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::email::{MailMessage, Mailer, TEMPLATE_PASSWORD_RESET, TEMPLATE_VERIFY_EMAIL};
use crate::error::AuthError;
use crate::kv::KvStore;
use crate::store::{CredentialStore, UserRecord};

use super::password;
use super::utils::{build_reset_url, build_verify_url, generate_opaque_token, hash_token};

const RESET_KEY_PREFIX: &str = "password_reset";
const VERIFICATION_KEY_PREFIX: &str = "email_verification";

pub(crate) struct ResetService {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    kv: Arc<dyn KvStore>,
    mailer: Arc<dyn Mailer>,
}

impl ResetService {
    pub(crate) fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        kv: Arc<dyn KvStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            store,
            kv,
            mailer,
        }
    }

    /// Issue a reset token for `user` and hand the link to the mailer.
    pub(crate) async fn request_reset(&self, user: &UserRecord) -> Result<(), AuthError> {
        let token = generate_opaque_token()?;
        let key = format!("{RESET_KEY_PREFIX}:{}", hash_token(&token));
        self.kv
            .set_with_ttl(
                &key,
                &user.id.to_string(),
                ttl(self.config.reset_token_ttl_seconds()),
            )
            .await?;

        let payload = json!({
            "username": user.username,
            "reset_url": build_reset_url(self.config.frontend_base_url(), &token),
        });
        self.hand_off(&user.email, TEMPLATE_PASSWORD_RESET, &payload);
        Ok(())
    }

    /// Consume a reset token: claim it, replace the password, and revoke
    /// every live session and lock on the account.
    pub(crate) async fn consume_reset(
        &self,
        raw_token: &str,
        new_password: &str,
    ) -> Result<Uuid, AuthError> {
        if let Err(reason) =
            password::validate_password_strength(new_password, self.config.min_password_length())
        {
            return Err(AuthError::Validation(reason));
        }

        let key = format!("{RESET_KEY_PREFIX}:{}", hash_token(raw_token));
        let user_id = self.claim(&key).await?;

        let password_hash = password::hash_password(new_password)?;
        self.store.update_password_hash(user_id, &password_hash).await?;
        // A fresh password invalidates every outstanding pair and any lock.
        self.store.delete_sessions_for_user(user_id).await?;
        self.store.delete_refresh_tokens_for_user(user_id).await?;
        self.store.set_lockout(user_id, None).await?;
        self.store.clear_failed_logins(user_id).await?;
        info!(%user_id, "password reset consumed");
        Ok(user_id)
    }

    /// Issue a verification token for `user` and hand the link to the
    /// mailer.
    pub(crate) async fn request_verification(&self, user: &UserRecord) -> Result<(), AuthError> {
        let token = generate_opaque_token()?;
        let key = format!("{VERIFICATION_KEY_PREFIX}:{}", hash_token(&token));
        self.kv
            .set_with_ttl(
                &key,
                &user.id.to_string(),
                ttl(self.config.verification_token_ttl_seconds()),
            )
            .await?;

        let payload = json!({
            "username": user.username,
            "verify_url": build_verify_url(self.config.frontend_base_url(), &token),
        });
        self.hand_off(&user.email, TEMPLATE_VERIFY_EMAIL, &payload);
        Ok(())
    }

    /// Consume a verification token and mark the account's email verified.
    pub(crate) async fn consume_verification(&self, raw_token: &str) -> Result<Uuid, AuthError> {
        let key = format!("{VERIFICATION_KEY_PREFIX}:{}", hash_token(raw_token));
        let user_id = self.claim(&key).await?;
        self.store.set_email_verified(user_id).await?;
        Ok(user_id)
    }

    /// Claim a single-use token key. The delete is the gate: only the caller
    /// that removes the key wins it.
    async fn claim(&self, key: &str) -> Result<Uuid, AuthError> {
        let Some(value) = self.kv.get(key).await? else {
            return Err(invalid_token());
        };
        if !self.kv.delete(key).await? {
            return Err(invalid_token());
        }
        let user_id = value.parse::<Uuid>().context("malformed token record")?;
        Ok(user_id)
    }

    // Mailer errors are logged, never propagated.
    fn hand_off(&self, to_email: &str, template: &str, payload: &serde_json::Value) {
        let message = MailMessage {
            to_email: to_email.to_string(),
            template: template.to_string(),
            payload_json: payload.to_string(),
        };
        if let Err(err) = self.mailer.send(&message) {
            warn!(template = %message.template, "mail hand-off failed: {err}");
        }
    }
}

fn invalid_token() -> AuthError {
    AuthError::NotFound("Invalid or expired token".to_string())
}

fn ttl(seconds: i64) -> Duration {
    Duration::from_secs(u64::try_from(seconds).unwrap_or(0))
}
