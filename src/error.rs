//! Error taxonomy shared by every auth operation.
//!
//! The routing layer maps [`ErrorKind`] onto HTTP status codes; the kinds are
//! therefore part of the wire contract and serialize under stable names.
//! Credential failures are deliberately generic so responses never reveal
//! whether an account exists, while lockout and rate-limit errors do report
//! the remaining wait time.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid or malformed token")]
    Unauthenticated,
    #[error("Token has expired")]
    Expired,
    #[error("Token has been revoked")]
    Revoked,
    #[error("Refresh token has already been used")]
    Reused,
    #[error("{0} is already in use")]
    Conflict(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error("Too many requests, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Account locked, retry in {retry_after_seconds}s")]
    Locked { retry_after_seconds: u64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Wire-level error categories. Unit variants serialize to their own names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ValidationError,
    AuthenticationError,
    ConflictError,
    NotFoundError,
    RateLimitError,
    LockedError,
    InternalError,
}

/// The `{kind, message}` body handed to the routing layer.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::InvalidCredentials
            | Self::Unauthenticated
            | Self::Expired
            | Self::Revoked
            | Self::Reused => ErrorKind::AuthenticationError,
            Self::Conflict(_) => ErrorKind::ConflictError,
            Self::NotFound(_) => ErrorKind::NotFoundError,
            Self::RateLimited { .. } => ErrorKind::RateLimitError,
            Self::Locked { .. } => ErrorKind::LockedError,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Build the response body. Internal errors keep their detail out of the
    /// envelope; callers log the source instead.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        let message = match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorEnvelope {
            kind: self.kind(),
            message,
        }
    }
}
