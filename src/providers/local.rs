//! In-memory session and mailbox for development and testing.
//!
//! [`LocalMailer`] accepts messages into memory instead of a server.
//! Addresses can be set to be refused outright ([`LocalMailer::reject`]) or
//! to be accepted and then bounce ([`LocalMailer::bounce`]), in which case a
//! failure notification is appended to the attached [`LocalMailbox`].
//!
//! # Testing Usage
//!
//! ```rust,ignore
//! use mailshot::providers::{LocalMailbox, LocalMailer};
//! use mailshot::testing::*;
//!
//! #[tokio::test]
//! async fn test_batch() {
//!     let mailbox = LocalMailbox::new();
//!     let mailer = LocalMailer::new().with_mailbox(mailbox.clone()).bounce("bad@school.edu");
//!
//!     // Code under test
//!     run_batch(mailer.clone(), mailbox.clone()).await;
//!
//!     assert_email_sent(&mailer);
//!     assert_session_closed(&mailer);
//! }
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::address::normalize;
use crate::bounce::Mailbox;
use crate::email::Email;
use crate::error::MailError;
use crate::mailer::{DeliveryResult, Mailer};
use crate::storage::{MemoryStorage, MessageStore, Storage, StoredEmail};

#[derive(Debug, Default)]
struct Behaviour {
    reject: HashSet<String>,
    bounce: HashSet<String>,
    /// If set, every deliver() returns this error.
    fail_with: Option<String>,
}

/// Session double that stores emails in memory.
///
/// Clones share storage, so a test can hand one clone to the batch and
/// inspect another afterwards.
#[derive(Clone, Default)]
pub struct LocalMailer {
    storage: Arc<MemoryStorage>,
    behaviour: Arc<RwLock<Behaviour>>,
    closes: Arc<AtomicUsize>,
    mailbox: Option<LocalMailbox>,
}

impl LocalMailer {
    /// Create a new local mailer with fresh storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver bounce notifications into `mailbox`.
    pub fn with_mailbox(mut self, mailbox: LocalMailbox) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    // =========================================================================
    // Failure Simulation
    // =========================================================================

    /// Refuse messages addressed to `email` at submission time.
    pub fn reject(self, email: &str) -> Self {
        self.behaviour.write().reject.insert(normalize(email));
        self
    }

    /// Accept messages addressed to `email`, then report them undeliverable
    /// through the attached mailbox.
    pub fn bounce(self, email: &str) -> Self {
        self.behaviour.write().bounce.insert(normalize(email));
        self
    }

    /// Configure the mailer to fail every delivery with an error message.
    pub fn set_failure(&self, message: impl Into<String>) {
        self.behaviour.write().fail_with = Some(message.into());
    }

    // =========================================================================
    // Email Access (for testing assertions)
    // =========================================================================

    /// All accepted emails, in send order.
    pub fn emails(&self) -> Vec<StoredEmail> {
        self.storage.all()
    }

    /// Get the most recently sent email.
    pub fn last_email(&self) -> Option<StoredEmail> {
        self.storage.last()
    }

    /// Get the count of sent emails.
    pub fn email_count(&self) -> usize {
        self.storage.count()
    }

    /// Remove and return all captured emails.
    pub fn flush(&self) -> Vec<StoredEmail> {
        self.storage.flush()
    }

    /// Check if any email was sent.
    pub fn has_emails(&self) -> bool {
        self.storage.count() > 0
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Query Helpers
    // =========================================================================

    /// Check if an email was sent to a specific address (any envelope list).
    pub fn sent_to(&self, email: &str) -> bool {
        let email = normalize(email);
        self.storage.all().iter().any(|stored| {
            stored
                .email
                .envelope_recipients()
                .iter()
                .any(|addr| addr.normalized() == email)
        })
    }
}

#[async_trait]
impl Mailer for LocalMailer {
    async fn deliver(&mut self, email: &Email) -> Result<DeliveryResult, MailError> {
        let (rejected, bounced) = {
            let behaviour = self.behaviour.read();
            if let Some(message) = &behaviour.fail_with {
                return Err(MailError::SendError(message.clone()));
            }
            let rcpts: Vec<String> = email.envelope_recipients().iter().map(|a| a.normalized()).collect();
            let rejected = rcpts.iter().find(|r| behaviour.reject.contains(*r)).cloned();
            let bounced: Vec<String> = rcpts.into_iter().filter(|r| behaviour.bounce.contains(r)).collect();
            (rejected, bounced)
        };

        if let Some(address) = rejected {
            return Err(MailError::Rejected(format!(
                "550 5.1.1 <{}>: Recipient address rejected: User unknown",
                address
            )));
        }

        if let Some(mailbox) = &self.mailbox {
            let sender = email.from.as_ref().map(|a| a.email.as_str()).unwrap_or("");
            for address in &bounced {
                mailbox.append(notification(sender, address));
            }
        }

        let message_id = self.storage.push(email.clone());
        Ok(DeliveryResult::new(message_id))
    }

    async fn close(&mut self) -> Result<(), MailError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "local"
    }
}

/// A Postfix-style non-delivery report for `address`.
pub fn notification(sender: &str, address: &str) -> String {
    format!(
        "From: MAILER-DAEMON@localhost (Mail Delivery System)\r\n\
         To: {sender}\r\n\
         Subject: Undelivered Mail Returned to Sender\r\n\
         Content-Type: text/plain; charset=us-ascii\r\n\
         \r\n\
         This is the mail system at host localhost.\r\n\
         \r\n\
         I'm sorry to have to inform you that your message could not\r\n\
         be delivered to one or more recipients.\r\n\
         \r\n\
         <{address}>: host mx.localhost said: 550 5.1.1 User unknown\r\n"
    )
}

/// Mailbox double. Clones share the same messages.
#[derive(Debug, Clone, Default)]
pub struct LocalMailbox {
    store: Arc<MessageStore>,
    unreachable: Option<String>,
    closes: Arc<AtomicUsize>,
}

impl LocalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailbox whose [`connect`](Self::connect) always fails with `reason`.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            unreachable: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Append a raw message as the newest.
    pub fn append(&self, raw: impl Into<Vec<u8>>) {
        self.store.append(raw);
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// How many sessions were closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Open a session on this mailbox.
    pub async fn connect(&self) -> Result<Self, MailError> {
        match &self.unreachable {
            Some(reason) => Err(MailError::connection("localhost:pop3", reason.clone())),
            None => Ok(self.clone()),
        }
    }
}

#[async_trait]
impl Mailbox for LocalMailbox {
    async fn count(&mut self) -> Result<usize, MailError> {
        Ok(self.store.len())
    }

    async fn retrieve(&mut self, index: usize) -> Result<Vec<u8>, MailError> {
        self.store
            .get(index)
            .ok_or_else(|| MailError::Mailbox(format!("-ERR no such message {}", index)))
    }

    async fn close(&mut self) -> Result<(), MailError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> Email {
        Email::new()
            .from("me@example.org")
            .to(to)
            .subject("Test Email")
            .html_body("<p>Hello!</p>")
    }

    #[tokio::test]
    async fn test_local_mailer_stores() {
        let mut mailer = LocalMailer::new();
        let result = mailer.deliver(&email("a@example.org")).await.unwrap();
        assert!(!result.message_id.is_empty());

        assert!(mailer.has_emails());
        assert_eq!(mailer.email_count(), 1);
        assert!(mailer.sent_to("A@example.org"));
        assert_eq!(mailer.last_email().unwrap().email.subject, "Test Email");
    }

    #[tokio::test]
    async fn test_reject() {
        let mut mailer = LocalMailer::new().reject("bad@example.org");
        let err = mailer.deliver(&email("bad@example.org")).await.unwrap_err();
        assert!(matches!(err, MailError::Rejected(_)));
        assert_eq!(mailer.email_count(), 0);

        mailer.deliver(&email("good@example.org")).await.unwrap();
        assert_eq!(mailer.email_count(), 1);
    }

    #[tokio::test]
    async fn test_bounce_appends_notification() {
        let mailbox = LocalMailbox::new();
        let mut mailer = LocalMailer::new()
            .with_mailbox(mailbox.clone())
            .bounce("gone@school.edu");

        mailer.deliver(&email("gone@school.edu")).await.unwrap();
        mailer.deliver(&email("here@school.edu")).await.unwrap();

        assert_eq!(mailer.email_count(), 2);
        assert_eq!(mailbox.len(), 1);
        let mut session = mailbox.connect().await.unwrap();
        let raw = String::from_utf8(session.retrieve(1).await.unwrap()).unwrap();
        assert!(raw.contains("gone@school.edu"));
    }

    #[tokio::test]
    async fn test_set_failure() {
        let mut mailer = LocalMailer::new();
        mailer.set_failure("Simulated failure");
        let err = mailer.deliver(&email("a@example.org")).await.unwrap_err();
        assert!(err.to_string().contains("Simulated failure"));
        assert!(!mailer.has_emails());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mailer = LocalMailer::new();
        let mut session = mailer.clone();
        session.deliver(&email("a@example.org")).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(mailer.email_count(), 1);
        assert_eq!(mailer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_mailbox() {
        let err = LocalMailbox::unreachable("connection refused")
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Connection { .. }));
    }
}
