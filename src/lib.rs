//! # Gardi (Credential & Session Security Core)
//!
//! `gardi` is the credential and session security core embedded by the
//! platform's API layer. It owns token issuance and rotation, session
//! revocation, login lockout, password-reset and email-verification token
//! lifecycles, minimal TOTP two-factor enrollment, and the distributed rate
//! limiter that throttles all of the above across server instances.
//!
//! ## Boundaries
//!
//! The crate is transport-independent: HTTP routing, the relational database
//! server, and the real mail provider are external collaborators reached
//! through the [`store::CredentialStore`], [`kv::KvStore`], and
//! [`email::Mailer`] seams. In-memory implementations of the store seams ship
//! with the crate so embedding services and tests can run without
//! infrastructure.
//!
//! ## Token Model
//!
//! - **Access tokens** are short-lived `HS256` JWTs backed by a live session
//!   row; deleting the row revokes the token before its `exp` arrives.
//! - **Refresh tokens** are longer-lived `HS256` JWTs (separate secret) that
//!   are single-use: rotation atomically consumes the stored record before a
//!   replacement pair is minted, and presenting a consumed token revokes
//!   every session of the account.
//! - **Reset / verification tokens** are opaque random values; only their
//!   SHA-256 digest is kept, with the key-value delete acting as the
//!   single-use gate.
//!
//! ## Shared State
//!
//! Rate-limit windows, lockout counters, and single-use token records live in
//! the shared stores rather than process memory, so any number of instances
//! can serve the same account pool. Expiry is enforced lazily at read time
//! plus native key TTLs; there are no background sweepers.

pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod kv;
pub mod store;

pub use auth::AuthService;
pub use config::AuthConfig;
pub use error::{AuthError, ErrorEnvelope, ErrorKind};
