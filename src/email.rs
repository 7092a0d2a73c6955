//! Mail hand-off boundary.
//!
//! The core never talks to a mail provider. Flows that produce email hand a
//! [`MailMessage`] to a [`Mailer`], and implementations are expected to
//! enqueue for delivery elsewhere (an outbox table, a broker) rather than
//! block on provider I/O. Callers inside the crate log and swallow mailer
//! errors so a slow or failing provider can never fail token issuance or a
//! reset request.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use tracing::info;

pub const TEMPLATE_VERIFY_EMAIL: &str = "verify_email";
pub const TEMPLATE_PASSWORD_RESET: &str = "password_reset";

#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Delivery hand-off used by reset and verification flows.
pub trait Mailer: Send + Sync {
    /// Accept a message for delivery or return an error to be logged.
    fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Local dev mailer that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "mail hand-off stub"
        );
        Ok(())
    }
}

/// Mailer that records every hand-off; test suites read the captured
/// messages back to follow reset and verification links.
#[derive(Debug, Default)]
pub struct CapturingMailer {
    messages: Mutex<Vec<MailMessage>>,
}

impl CapturingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages handed off so far, oldest first.
    pub fn messages(&self) -> Vec<MailMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Mailer for CapturingMailer {
    fn send(&self, message: &MailMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}
