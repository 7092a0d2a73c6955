//! Credential and session façade.
//!
//! [`AuthService`] is the single entry point the routing layer talks to. It
//! wires the token, lockout, rate-limit, reset, and two-factor pieces
//! together behind the [`CredentialStore`], [`KvStore`], and [`Mailer`]
//! seams, and every public operation clears its rate-limit policy before any
//! other work runs.

mod lockout;
mod password;
pub mod rate_limit;
mod reset;
pub mod tokens;
pub mod types;
mod twofactor;
mod utils;

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::email::Mailer;
use crate::error::AuthError;
use crate::kv::KvStore;
use crate::store::{CreateUserOutcome, CredentialStore, NewUser};

use lockout::{LockState, LockoutGuard};
use reset::ResetService;
use twofactor::TwoFactorService;

pub use rate_limit::{
    NoopRateLimiter, RateLimitDecision, RateLimitPolicy, RateLimiter, SlidingWindowLimiter,
};
pub use tokens::{AccessClaims, TokenService};
pub use types::{
    AuthenticatedUser, ClientMeta, LoginRequest, PublicUser, RegisterRequest, TokenPair,
    TwoFactorSetup,
};

pub struct AuthService {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    limiter: Arc<dyn RateLimiter>,
    tokens: TokenService,
    lockout: LockoutGuard,
    reset: ResetService,
    two_factor: TwoFactorService,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        kv: Arc<dyn KvStore>,
        mailer: Arc<dyn Mailer>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let tokens = TokenService::new(config.clone(), Arc::clone(&store));
        let lockout = LockoutGuard::new(config.clone(), Arc::clone(&store));
        let reset = ResetService::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&kv),
            mailer,
        );
        let two_factor = TwoFactorService::new(config.clone(), Arc::clone(&store), kv);
        Self {
            config,
            store,
            limiter,
            tokens,
            lockout,
            reset,
            two_factor,
        }
    }

    /// Create an account, issue its first token pair, and queue the
    /// address-verification email.
    pub async fn register(
        &self,
        client: &ClientMeta,
        request: &RegisterRequest,
    ) -> Result<AuthenticatedUser, AuthError> {
        self.enforce_limit(&rate_limit::AUTH, client.rate_limit_key())
            .await?;

        let email = utils::normalize_email(&request.email);
        if !utils::valid_email(&email) {
            return Err(AuthError::Validation("Invalid email address".to_string()));
        }
        if !utils::valid_username(&request.username) {
            return Err(AuthError::Validation(
                "Username must be 3-32 characters of letters, digits, or underscores".to_string(),
            ));
        }
        if let Err(reason) =
            password::validate_password_strength(&request.password, self.config.min_password_length())
        {
            return Err(AuthError::Validation(reason));
        }

        let new_user = NewUser {
            email,
            username: request.username.clone(),
            password_hash: password::hash_password(&request.password)?,
            role: "user".to_string(),
        };
        let user = match self.store.create_user(&new_user).await? {
            CreateUserOutcome::Created(user) => user,
            CreateUserOutcome::DuplicateEmail => return Err(AuthError::Conflict("email")),
            CreateUserOutcome::DuplicateUsername => return Err(AuthError::Conflict("username")),
        };
        info!(user_id = %user.id, "user registered");

        let tokens = self.tokens.issue_pair(&user, client).await?;
        self.reset.request_verification(&user).await?;

        Ok(AuthenticatedUser {
            user: PublicUser::from(&user),
            tokens,
        })
    }

    /// Authenticate with email and password.
    pub async fn login(
        &self,
        client: &ClientMeta,
        request: &LoginRequest,
    ) -> Result<AuthenticatedUser, AuthError> {
        self.enforce_limit(&rate_limit::AUTH, client.rate_limit_key())
            .await?;

        let email = utils::normalize_email(&request.email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            // Same error as a wrong password; accounts are not enumerable.
            return Err(AuthError::InvalidCredentials);
        };

        if let LockState::Locked { retry_after_seconds } =
            self.lockout.check(user.id, user.lockout_until).await?
        {
            return Err(AuthError::Locked { retry_after_seconds });
        }

        if !password::verify_password(&request.password, &user.password_hash)? {
            let outcome = self.lockout.record_failure(user.id).await?;
            if outcome.locked {
                return Err(AuthError::Locked {
                    retry_after_seconds: outcome.retry_after_seconds,
                });
            }
            debug!(
                user_id = %user.id,
                attempts_remaining = outcome.attempts_remaining,
                "failed login recorded"
            );
            return Err(AuthError::InvalidCredentials);
        }

        self.lockout.clear_on_success(user.id).await?;
        let tokens = self.tokens.issue_pair(&user, client).await?;
        info!(user_id = %user.id, "user logged in");

        Ok(AuthenticatedUser {
            user: PublicUser::from(&user),
            tokens,
        })
    }

    /// Swap a refresh token for a fresh pair. A replayed token fails with
    /// [`AuthError::Reused`] after revoking the account's sessions.
    pub async fn refresh(
        &self,
        client: &ClientMeta,
        refresh_token: &str,
    ) -> Result<TokenPair, AuthError> {
        self.enforce_limit(&rate_limit::GENERAL_API, client.rate_limit_key())
            .await?;
        self.tokens.rotate_refresh(refresh_token, client).await
    }

    /// Validate an access token for an incoming request. Not rate limited;
    /// the routing layer calls this on every authenticated request.
    pub async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.tokens.verify_access(token).await
    }

    /// End one session, or every session when `session_id` is `None`.
    /// Logging out an already-dead session succeeds.
    pub async fn logout(
        &self,
        client: &ClientMeta,
        user_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<(), AuthError> {
        self.enforce_limit(&rate_limit::GENERAL_API, client.rate_limit_key())
            .await?;
        match session_id {
            Some(session_id) => self.tokens.revoke_session(user_id, session_id).await?,
            None => {
                self.tokens.revoke_all_sessions(user_id).await?;
            }
        }
        info!(%user_id, "logged out");
        Ok(())
    }

    /// Start a password reset. Succeeds whether or not the email exists, so
    /// the endpoint cannot be used to enumerate accounts.
    pub async fn forgot_password(&self, client: &ClientMeta, email: &str) -> Result<(), AuthError> {
        self.enforce_limit(&rate_limit::PASSWORD_RESET, client.rate_limit_key())
            .await?;

        let email = utils::normalize_email(email);
        match self.store.find_user_by_email(&email).await? {
            Some(user) => self.reset.request_reset(&user).await,
            None => {
                debug!("password reset requested for unknown email");
                Ok(())
            }
        }
    }

    /// Complete a password reset with a token from the email link.
    pub async fn reset_password(
        &self,
        client: &ClientMeta,
        raw_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.enforce_limit(&rate_limit::PASSWORD_RESET, client.rate_limit_key())
            .await?;
        self.reset.consume_reset(raw_token, new_password).await?;
        Ok(())
    }

    /// Replace the password of an authenticated user and revoke every
    /// outstanding session. Limited per account rather than per client.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.enforce_limit(&rate_limit::AUTH, &user_id.to_string())
            .await?;

        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))?;
        if !password::verify_password(current_password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        if let Err(reason) =
            password::validate_password_strength(new_password, self.config.min_password_length())
        {
            return Err(AuthError::Validation(reason));
        }

        let password_hash = password::hash_password(new_password)?;
        self.store.update_password_hash(user_id, &password_hash).await?;
        self.tokens.revoke_all_sessions(user_id).await?;
        info!(%user_id, "password changed");
        Ok(())
    }

    /// Re-send the address-verification email. A no-op for accounts that are
    /// already verified.
    pub async fn request_email_verification(
        &self,
        client: &ClientMeta,
        user_id: Uuid,
    ) -> Result<(), AuthError> {
        self.enforce_limit(&rate_limit::GENERAL_API, client.rate_limit_key())
            .await?;

        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))?;
        if user.email_verified {
            return Ok(());
        }
        self.reset.request_verification(&user).await
    }

    /// Confirm an email address with a token from the verification link.
    pub async fn verify_email(&self, client: &ClientMeta, raw_token: &str) -> Result<(), AuthError> {
        self.enforce_limit(&rate_limit::GENERAL_API, client.rate_limit_key())
            .await?;
        let user_id = self.reset.consume_verification(raw_token).await?;
        info!(%user_id, "email verified");
        Ok(())
    }

    /// Begin TOTP enrollment for an authenticated user.
    pub async fn setup_two_factor(
        &self,
        client: &ClientMeta,
        user_id: Uuid,
    ) -> Result<TwoFactorSetup, AuthError> {
        self.enforce_limit(&rate_limit::GENERAL_API, client.rate_limit_key())
            .await?;
        self.two_factor.setup(user_id).await
    }

    /// Confirm TOTP enrollment with a code from the authenticator app.
    /// `Ok(false)` means a wrong code; the pending setup survives.
    pub async fn verify_two_factor(
        &self,
        client: &ClientMeta,
        user_id: Uuid,
        code: &str,
    ) -> Result<bool, AuthError> {
        self.enforce_limit(&rate_limit::GENERAL_API, client.rate_limit_key())
            .await?;
        self.two_factor.verify(user_id, code).await
    }

    async fn enforce_limit(
        &self,
        policy: &RateLimitPolicy,
        client_key: &str,
    ) -> Result<(), AuthError> {
        match self.limiter.check(policy, client_key).await {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited { retry_after_seconds } => {
                Err(AuthError::RateLimited { retry_after_seconds })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::CapturingMailer;
    use crate::kv::MemoryKv;
    use crate::store::MemoryStore;
    use anyhow::bail;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::time::Duration;

    fn service() -> AuthService {
        let config = AuthConfig::new(
            "http://localhost:3000".to_string(),
            SecretString::from("access-secret"),
            SecretString::from("refresh-secret"),
        );
        AuthService::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryKv::new()),
            Arc::new(CapturingMailer::new()),
            Arc::new(NoopRateLimiter),
        )
    }

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            password: "correct horse 9".to_string(),
        }
    }

    #[tokio::test]
    async fn register_rejects_invalid_email() {
        let service = service();
        let request = RegisterRequest {
            email: "not-an-email".to_string(),
            ..register_request()
        };
        assert!(matches!(
            service.register(&ClientMeta::default(), &request).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn register_rejects_short_password() {
        let service = service();
        let request = RegisterRequest {
            password: "pw1".to_string(),
            ..register_request()
        };
        assert!(matches!(
            service.register(&ClientMeta::default(), &request).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn register_conflicts_on_duplicate_email() {
        let service = service();
        service
            .register(&ClientMeta::default(), &register_request())
            .await
            .unwrap();

        let request = RegisterRequest {
            username: "alice2".to_string(),
            ..register_request()
        };
        assert!(matches!(
            service.register(&ClientMeta::default(), &request).await,
            Err(AuthError::Conflict("email"))
        ));
    }

    #[tokio::test]
    async fn register_normalizes_the_email() {
        let service = service();
        let request = RegisterRequest {
            email: "  Alice@Example.COM ".to_string(),
            ..register_request()
        };
        let registered = service
            .register(&ClientMeta::default(), &request)
            .await
            .unwrap();
        assert_eq!(registered.user.email, "alice@example.com");
    }

    struct UnreachableKv;

    #[async_trait]
    impl KvStore for UnreachableKv {
        async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            bail!("kv unreachable")
        }

        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> anyhow::Result<()> {
            bail!("kv unreachable")
        }

        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            bail!("kv unreachable")
        }

        async fn delete(&self, _key: &str) -> anyhow::Result<bool> {
            bail!("kv unreachable")
        }

        async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> anyhow::Result<()> {
            bail!("kv unreachable")
        }

        async fn zremrangebyscore(
            &self,
            _key: &str,
            _min: f64,
            _max: f64,
        ) -> anyhow::Result<u64> {
            bail!("kv unreachable")
        }

        async fn zcard(&self, _key: &str) -> anyhow::Result<u64> {
            bail!("kv unreachable")
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> anyhow::Result<()> {
            bail!("kv unreachable")
        }
    }

    #[tokio::test]
    async fn register_fails_closed_when_the_kv_store_is_unreachable() {
        let config = AuthConfig::new(
            "http://localhost:3000".to_string(),
            SecretString::from("access-secret"),
            SecretString::from("refresh-secret"),
        );
        let mailer = Arc::new(CapturingMailer::new());
        let service = AuthService::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(UnreachableKv),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Arc::new(NoopRateLimiter),
        );

        assert!(matches!(
            service.register(&ClientMeta::default(), &register_request()).await,
            Err(AuthError::Internal(_))
        ));
        // The hand-off happens after the token write; nothing was sent.
        assert!(mailer.messages().is_empty());
    }

    #[tokio::test]
    async fn login_with_unknown_email_is_invalid_credentials() {
        let service = service();
        let request = LoginRequest {
            email: "ghost@example.com".to_string(),
            password: "whatever pw 1".to_string(),
        };
        assert!(matches!(
            service.login(&ClientMeta::default(), &request).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn logout_of_absent_session_succeeds() {
        let service = service();
        let registered = service
            .register(&ClientMeta::default(), &register_request())
            .await
            .unwrap();
        service
            .logout(
                &ClientMeta::default(),
                registered.user.id,
                Some(Uuid::new_v4()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn forgot_password_swallows_unknown_emails() {
        let service = service();
        service
            .forgot_password(&ClientMeta::default(), "ghost@example.com")
            .await
            .unwrap();
    }
}
