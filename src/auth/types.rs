//! Request and response types for the auth façade.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::UserRecord;

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request metadata forwarded by the routing layer.
#[derive(Clone, Debug, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    /// Rate-limit key: the client IP when known, one shared bucket otherwise.
    pub(crate) fn rate_limit_key(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: i64,
}

/// Account fields safe to expose to clients.
#[derive(Clone, Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: String,
    pub email_verified: bool,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role.clone(),
            email_verified: user.email_verified,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AuthenticatedUser {
    pub user: PublicUser,
    pub tokens: TokenPair,
}

#[derive(Clone, Debug, Serialize)]
pub struct TwoFactorSetup {
    pub secret_base32: String,
    pub provisioning_uri: String,
}
