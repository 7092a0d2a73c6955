//! Auth configuration: token lifetimes, lockout tuning, and signing secrets.

use anyhow::{Context, Result, bail};
use secrecy::SecretString;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_FAILED_LOGINS: i32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_TWO_FACTOR_SETUP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_TOTP_ISSUER: &str = "Gardi";

const ENV_ACCESS_TOKEN_SECRET: &str = "GARDI_ACCESS_TOKEN_SECRET";
const ENV_REFRESH_TOKEN_SECRET: &str = "GARDI_REFRESH_TOKEN_SECRET";
const ENV_FRONTEND_BASE_URL: &str = "GARDI_FRONTEND_BASE_URL";
const ENV_ACCESS_TOKEN_TTL_SECONDS: &str = "GARDI_ACCESS_TOKEN_TTL_SECONDS";
const ENV_REFRESH_TOKEN_TTL_SECONDS: &str = "GARDI_REFRESH_TOKEN_TTL_SECONDS";
const ENV_MAX_FAILED_LOGINS: &str = "GARDI_MAX_FAILED_LOGINS";
const ENV_LOCKOUT_SECONDS: &str = "GARDI_LOCKOUT_SECONDS";
const ENV_TOTP_ISSUER: &str = "GARDI_TOTP_ISSUER";

/// Configuration for every auth component. Signing secrets are held as
/// [`SecretString`] so debug output and logs never carry key material.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_token_secret: SecretString,
    refresh_token_secret: SecretString,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    max_failed_logins: i32,
    lockout_seconds: i64,
    reset_token_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    two_factor_setup_ttl_seconds: i64,
    min_password_length: usize,
    totp_issuer: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(
        frontend_base_url: String,
        access_token_secret: SecretString,
        refresh_token_secret: SecretString,
    ) -> Self {
        Self {
            frontend_base_url,
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS,
            two_factor_setup_ttl_seconds: DEFAULT_TWO_FACTOR_SETUP_TTL_SECONDS,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
        }
    }

    /// Load configuration from `GARDI_*` environment variables.
    ///
    /// Both signing secrets are required; everything else falls back to the
    /// defaults above.
    ///
    /// # Errors
    ///
    /// Returns an error when a required secret is missing or a numeric
    /// override fails to parse.
    pub fn from_env() -> Result<Self> {
        let access_token_secret = require_secret_env(ENV_ACCESS_TOKEN_SECRET)?;
        let refresh_token_secret = require_secret_env(ENV_REFRESH_TOKEN_SECRET)?;
        let frontend_base_url = std::env::var(ENV_FRONTEND_BASE_URL)
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let mut config = Self::new(frontend_base_url, access_token_secret, refresh_token_secret);

        if let Some(seconds) = parse_i64_env(ENV_ACCESS_TOKEN_TTL_SECONDS)? {
            config = config.with_access_token_ttl_seconds(seconds);
        }
        if let Some(seconds) = parse_i64_env(ENV_REFRESH_TOKEN_TTL_SECONDS)? {
            config = config.with_refresh_token_ttl_seconds(seconds);
        }
        if let Some(max) = parse_i64_env(ENV_MAX_FAILED_LOGINS)? {
            let max = i32::try_from(max).context("max failed logins out of range")?;
            config = config.with_max_failed_logins(max);
        }
        if let Some(seconds) = parse_i64_env(ENV_LOCKOUT_SECONDS)? {
            config = config.with_lockout_seconds(seconds);
        }
        if let Ok(issuer) = std::env::var(ENV_TOTP_ISSUER) {
            config = config.with_totp_issuer(issuer);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_failed_logins(mut self, max: i32) -> Self {
        self.max_failed_logins = max;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_two_factor_setup_ttl_seconds(mut self, seconds: i64) -> Self {
        self.two_factor_setup_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn max_failed_logins(&self) -> i32 {
        self.max_failed_logins
    }

    #[must_use]
    pub fn lockout_seconds(&self) -> i64 {
        self.lockout_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    #[must_use]
    pub fn two_factor_setup_ttl_seconds(&self) -> i64 {
        self.two_factor_setup_ttl_seconds
    }

    #[must_use]
    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    pub(crate) fn access_token_secret(&self) -> &SecretString {
        &self.access_token_secret
    }

    pub(crate) fn refresh_token_secret(&self) -> &SecretString {
        &self.refresh_token_secret
    }
}

fn require_secret_env(key: &str) -> Result<SecretString> {
    let value = std::env::var(key).with_context(|| format!("{key} must be set"))?;
    if value.trim().is_empty() {
        bail!("{key} must not be empty");
    }
    Ok(SecretString::from(value))
}

fn parse_i64_env(key: &str) -> Result<Option<i64>> {
    match std::env::var(key) {
        Ok(value) => {
            let parsed = value
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{key} must be a valid integer"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::AuthConfig;
    use secrecy::{ExposeSecret, SecretString};

    fn test_config() -> AuthConfig {
        AuthConfig::new(
            "https://gardi.dev".to_string(),
            SecretString::from("access-secret"),
            SecretString::from("refresh-secret"),
        )
    }

    #[test]
    fn defaults_and_overrides() {
        let config = test_config();

        assert_eq!(config.frontend_base_url(), "https://gardi.dev");
        assert_eq!(
            config.access_token_ttl_seconds(),
            super::DEFAULT_ACCESS_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.refresh_token_ttl_seconds(),
            super::DEFAULT_REFRESH_TOKEN_TTL_SECONDS
        );
        assert_eq!(config.max_failed_logins(), super::DEFAULT_MAX_FAILED_LOGINS);
        assert_eq!(config.lockout_seconds(), super::DEFAULT_LOCKOUT_SECONDS);
        assert_eq!(
            config.reset_token_ttl_seconds(),
            super::DEFAULT_RESET_TOKEN_TTL_SECONDS
        );
        assert_eq!(config.totp_issuer(), super::DEFAULT_TOTP_ISSUER);

        let config = config
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(120)
            .with_max_failed_logins(3)
            .with_lockout_seconds(30)
            .with_reset_token_ttl_seconds(10)
            .with_verification_token_ttl_seconds(20)
            .with_two_factor_setup_ttl_seconds(40)
            .with_min_password_length(12)
            .with_totp_issuer("Test".to_string());

        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 120);
        assert_eq!(config.max_failed_logins(), 3);
        assert_eq!(config.lockout_seconds(), 30);
        assert_eq!(config.reset_token_ttl_seconds(), 10);
        assert_eq!(config.verification_token_ttl_seconds(), 20);
        assert_eq!(config.two_factor_setup_ttl_seconds(), 40);
        assert_eq!(config.min_password_length(), 12);
        assert_eq!(config.totp_issuer(), "Test");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = test_config();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
    }

    #[test]
    fn from_env_requires_secrets() {
        temp_env::with_vars(
            [
                ("GARDI_ACCESS_TOKEN_SECRET", None::<&str>),
                ("GARDI_REFRESH_TOKEN_SECRET", None::<&str>),
            ],
            || {
                assert!(AuthConfig::from_env().is_err());
            },
        );
    }

    #[test]
    fn from_env_rejects_empty_secret() {
        temp_env::with_vars(
            [
                ("GARDI_ACCESS_TOKEN_SECRET", Some("  ")),
                ("GARDI_REFRESH_TOKEN_SECRET", Some("refresh")),
            ],
            || {
                assert!(AuthConfig::from_env().is_err());
            },
        );
    }

    #[test]
    fn from_env_applies_overrides() {
        temp_env::with_vars(
            [
                ("GARDI_ACCESS_TOKEN_SECRET", Some("access")),
                ("GARDI_REFRESH_TOKEN_SECRET", Some("refresh")),
                ("GARDI_FRONTEND_BASE_URL", Some("https://app.test")),
                ("GARDI_ACCESS_TOKEN_TTL_SECONDS", Some("300")),
                ("GARDI_MAX_FAILED_LOGINS", Some("3")),
                ("GARDI_LOCKOUT_SECONDS", Some("60")),
                ("GARDI_TOTP_ISSUER", Some("App")),
            ],
            || {
                let config = AuthConfig::from_env().unwrap();
                assert_eq!(config.frontend_base_url(), "https://app.test");
                assert_eq!(config.access_token_ttl_seconds(), 300);
                assert_eq!(config.max_failed_logins(), 3);
                assert_eq!(config.lockout_seconds(), 60);
                assert_eq!(config.totp_issuer(), "App");
                assert_eq!(config.access_token_secret().expose_secret(), "access");
            },
        );
    }

    #[test]
    fn from_env_rejects_bad_numbers() {
        temp_env::with_vars(
            [
                ("GARDI_ACCESS_TOKEN_SECRET", Some("access")),
                ("GARDI_REFRESH_TOKEN_SECRET", Some("refresh")),
                ("GARDI_ACCESS_TOKEN_TTL_SECONDS", Some("soon")),
            ],
            || {
                assert!(AuthConfig::from_env().is_err());
            },
        );
    }
}
