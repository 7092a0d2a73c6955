//! Minimal TOTP enrollment.
//!
//! Setup parks a fresh secret under a short-lived KV key; the first valid
//! code promotes it to the permanent key and deletes the setup entry. Codes
//! that arrive after the setup TTL find nothing and the client starts over.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::info;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::kv::KvStore;
use crate::store::CredentialStore;

use super::types::TwoFactorSetup;

const SETUP_KEY_PREFIX: &str = "two_factor:setup";
const SECRET_KEY_PREFIX: &str = "two_factor:secret";

pub(crate) struct TwoFactorService {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    kv: Arc<dyn KvStore>,
}

impl TwoFactorService {
    pub(crate) fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self { config, store, kv }
    }

    /// Begin enrollment: generate a secret, park it under the setup key, and
    /// return provisioning data for the authenticator app.
    pub(crate) async fn setup(&self, user_id: Uuid) -> Result<TwoFactorSetup, AuthError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))?;

        let secret = Secret::generate_secret();
        let totp = build_totp(&secret, self.config.totp_issuer(), &user.email)?;
        let secret_base32 = totp.get_secret_base32();

        let key = setup_key(user_id);
        let ttl = Duration::from_secs(
            u64::try_from(self.config.two_factor_setup_ttl_seconds()).unwrap_or(0),
        );
        self.kv.set_with_ttl(&key, &secret_base32, ttl).await?;

        Ok(TwoFactorSetup {
            provisioning_uri: totp.get_url(),
            secret_base32,
        })
    }

    /// Check `code` against the pending secret. A valid code promotes the
    /// secret to the permanent key; an invalid one leaves the setup in place
    /// for another attempt within its TTL.
    pub(crate) async fn verify(&self, user_id: Uuid, code: &str) -> Result<bool, AuthError> {
        let setup_key = setup_key(user_id);
        let Some(secret_base32) = self.kv.get(&setup_key).await? else {
            return Err(AuthError::NotFound(
                "Two-factor setup not found or expired".to_string(),
            ));
        };

        // The label has no effect on code checking.
        let secret = Secret::Encoded(secret_base32.clone());
        let totp = build_totp(&secret, self.config.totp_issuer(), "pending")?;
        if !totp.check_current(code).unwrap_or(false) {
            return Ok(false);
        }

        self.kv
            .set(&format!("{SECRET_KEY_PREFIX}:{user_id}"), &secret_base32)
            .await?;
        self.kv.delete(&setup_key).await?;
        info!(%user_id, "two-factor enrollment confirmed");
        Ok(true)
    }
}

fn setup_key(user_id: Uuid) -> String {
    format!("{SETUP_KEY_PREFIX}:{user_id}")
}

fn build_totp(secret: &Secret, issuer: &str, account: &str) -> Result<TOTP, AuthError> {
    let secret_bytes = secret
        .to_bytes()
        .map_err(|err| AuthError::Internal(anyhow!("invalid totp secret: {err:?}")))?;
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|err| AuthError::Internal(anyhow!("failed to build totp: {err}")))
}
