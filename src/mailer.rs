//! Submission session trait and delivery result types.
//!
//! A [`Mailer`] is one open, authenticated session with a mail-submission
//! server. It is opened once per batch, fed messages one at a time, and
//! closed exactly once when the batch ends.
//!
//! The CLI picks the session at runtime and drives it as `Box<dyn Mailer>`,
//! hence `async_trait`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::email::Email;
use crate::error::MailError;

/// Result of a message accepted by the submission server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Message ID or queue ID reported by the server
    pub message_id: String,
    /// Raw server response line, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl DeliveryResult {
    /// Create a new delivery result with just a message ID.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            response: None,
        }
    }

    /// Create a delivery result carrying the server's response line.
    pub fn with_response(message_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            response: Some(response.into()),
        }
    }
}

/// An open submission session.
///
/// # Example
///
/// ```ignore
/// use mailshot::{Email, Mailer};
/// use mailshot::providers::SmtpSession;
///
/// let mut session = SmtpSession::open(&credentials, &endpoint).await?;
/// session.deliver(&email).await?;
/// session.close().await?;
/// ```
#[async_trait]
pub trait Mailer: Send {
    /// Submit one message to every envelope recipient (to + cc + bcc).
    ///
    /// A rejection by the server is returned as an error but leaves the
    /// session usable for the next message.
    async fn deliver(&mut self, email: &Email) -> Result<DeliveryResult, MailError>;

    /// End the session gracefully. Called exactly once.
    async fn close(&mut self) -> Result<(), MailError>;

    /// Get the provider name (for logging/debugging).
    fn provider_name(&self) -> &'static str {
        "unknown"
    }
}

#[async_trait]
impl<M: Mailer + ?Sized> Mailer for Box<M> {
    async fn deliver(&mut self, email: &Email) -> Result<DeliveryResult, MailError> {
        (**self).deliver(email).await
    }

    async fn close(&mut self) -> Result<(), MailError> {
        (**self).close().await
    }

    fn provider_name(&self) -> &'static str {
        (**self).provider_name()
    }
}
