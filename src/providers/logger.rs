//! Dry-run session behind the CLI's `--no-send`.
//!
//! The whole batch runs (throttle included) but each message is logged
//! instead of submitted.

use async_trait::async_trait;

use crate::email::Email;
use crate::error::MailError;
use crate::mailer::{DeliveryResult, Mailer};

/// A [`Mailer`] that accepts everything and logs it.
#[derive(Debug, Default)]
pub struct LoggerMailer {
    full: bool,
    delivered: usize,
}

impl LoggerMailer {
    /// Log the recipient and subject of each message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log sender, copies, attachments, and the rendered body (at DEBUG).
    pub fn full() -> Self {
        Self {
            full: true,
            delivered: 0,
        }
    }

    /// Messages accepted so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

#[async_trait]
impl Mailer for LoggerMailer {
    async fn deliver(&mut self, email: &Email) -> Result<DeliveryResult, MailError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.delivered += 1;

        if self.full {
            let envelope: Vec<String> = email
                .envelope_recipients()
                .iter()
                .map(|a| a.formatted())
                .collect();
            tracing::info!(
                message_id = %message_id,
                from = ?email.from.as_ref().map(|a| a.formatted()),
                to = %email.to_header(),
                envelope = ?envelope,
                subject = %email.subject,
                attachments = ?email.attachments.iter().map(|a| &a.filename).collect::<Vec<_>>(),
                "Email not sent (dry run)"
            );
            if let Some(html) = &email.html_body {
                tracing::debug!(to = %email.to_header(), body = %html, "Rendered body");
            }
        } else {
            tracing::info!(
                to = %email.to_header(),
                subject = %email.subject,
                "Email not sent (dry run)"
            );
        }

        Ok(DeliveryResult::new(message_id))
    }

    async fn close(&mut self) -> Result<(), MailError> {
        tracing::info!(delivered = self.delivered, "Dry run finished");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "logger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter_to(to: &str) -> Email {
        Email::new()
            .from(("Jane Doe", "jane@example.org"))
            .to(to)
            .bcc("archive@example.org")
            .subject("Invitation")
            .html_body("<p>Dear Prof</p>")
    }

    #[tokio::test]
    async fn test_accepts_and_counts() {
        let mut mailer = LoggerMailer::new();

        let first = mailer.deliver(&letter_to("a@example.edu")).await.unwrap();
        let second = mailer.deliver(&letter_to("b@example.edu")).await.unwrap();

        assert_ne!(first.message_id, second.message_id);
        assert_eq!(mailer.delivered(), 2);
        assert!(mailer.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_full_logging_accepts() {
        let mut mailer = LoggerMailer::full();
        assert!(mailer.deliver(&letter_to("a@example.edu")).await.is_ok());
        assert_eq!(mailer.provider_name(), "logger");
    }
}
