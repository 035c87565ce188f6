//! Testing utilities and assertion helpers.
//!
//! # Example
//!
//! ```rust,ignore
//! use mailshot::providers::LocalMailer;
//! use mailshot::testing::*;
//! use mailshot::Batch;
//!
//! #[tokio::test]
//! async fn test_invitations() {
//!     let mailer = LocalMailer::new();
//!     let sleeper = RecordingSleeper::tracking(&mailer);
//!
//!     let tracker = Batch::new(&sleeper).send(&mut mailer.clone(), emails).await;
//!
//!     assert_email_count(&mailer, 12);
//!     assert_email_to(&mailer, "prof@example.edu");
//!     assert_session_closed(&mailer);
//!     assert_eq!(sleeper.pauses()[0].after_sends, 10);
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::providers::LocalMailer;
use crate::storage::StoredEmail;
use crate::throttle::Sleeper;

// ============================================================================
// Helper Functions
// ============================================================================

/// Format a list of emails for error messages.
fn format_email_summary(emails: &[StoredEmail]) -> String {
    if emails.is_empty() {
        return "  (no emails sent)".to_string();
    }

    emails
        .iter()
        .enumerate()
        .map(|(i, stored)| {
            let e = &stored.email;
            let from = e
                .from
                .as_ref()
                .map(|a| a.email.as_str())
                .unwrap_or("<none>");
            format!(
                "  {}. To: [{}], From: {}, Subject: \"{}\"",
                i + 1,
                e.to_header(),
                from,
                e.subject
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn last_email(mailer: &LocalMailer) -> StoredEmail {
    mailer
        .last_email()
        .expect("Expected at least one email to be sent, but none were sent")
}

// ============================================================================
// Basic Assertions
// ============================================================================

/// Assert that at least one email was sent.
///
/// # Panics
///
/// Panics if no emails were sent.
pub fn assert_email_sent(mailer: &LocalMailer) {
    assert!(
        mailer.has_emails(),
        "Expected at least one email to be sent, but none were sent"
    );
}

/// Assert that no emails were sent.
pub fn assert_no_emails_sent(mailer: &LocalMailer) {
    let emails = mailer.emails();
    assert!(
        emails.is_empty(),
        "Expected no emails to be sent, but {} were sent.\n\nEmails sent:\n{}",
        emails.len(),
        format_email_summary(&emails)
    );
}

/// Assert that exactly N emails were sent.
pub fn assert_email_count(mailer: &LocalMailer, expected: usize) {
    let actual = mailer.email_count();
    assert!(
        actual == expected,
        "Expected {} email(s) to be sent, but {} were sent.\n\nEmails sent:\n{}",
        expected,
        actual,
        format_email_summary(&mailer.emails())
    );
}

/// Assert that an email was submitted to `email` (To, Cc, or Bcc).
pub fn assert_email_to(mailer: &LocalMailer, email: &str) {
    assert!(
        mailer.sent_to(email),
        "Expected an email to be sent to '{}'.\n\nEmails sent:\n{}",
        email,
        format_email_summary(&mailer.emails())
    );
}

/// Assert that no email was submitted to `email`.
pub fn refute_email_to(mailer: &LocalMailer, email: &str) {
    assert!(
        !mailer.sent_to(email),
        "Expected no email to be sent to '{}', but one was.\n\nEmails sent:\n{}",
        email,
        format_email_summary(&mailer.emails())
    );
}

/// Assert the last email has HTML body containing text.
pub fn assert_email_html_contains(mailer: &LocalMailer, text: &str) {
    let last = last_email(mailer);
    let html = last.email.html_body.as_deref().unwrap_or("");

    assert!(
        html.contains(text),
        "Expected HTML body to contain '{}', but it didn't.\n\nLast email:\n{}\n\nHTML body (first 500 chars):\n{}",
        text,
        format_email_summary(std::slice::from_ref(&last)),
        html.chars().take(500).collect::<String>()
    );
}

/// Assert the last email has an attachment with the given filename.
pub fn assert_email_has_attachment(mailer: &LocalMailer, filename: &str) {
    let last = last_email(mailer);
    let has_attachment = last.email.attachments.iter().any(|a| a.filename == filename);

    let attachment_list = last
        .email
        .attachments
        .iter()
        .map(|a| a.filename.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    assert!(
        has_attachment,
        "Expected email to have attachment '{}'.\n\nLast email:\n{}\n\nAttachments: [{}]",
        filename,
        format_email_summary(std::slice::from_ref(&last)),
        attachment_list
    );
}

/// Assert the session was closed exactly once.
pub fn assert_session_closed(mailer: &LocalMailer) {
    let closes = mailer.close_count();
    assert!(
        closes == 1,
        "Expected the session to be closed exactly once, but it was closed {} time(s)",
        closes
    );
}

// ============================================================================
// Sleeper
// ============================================================================

/// A throttle pause observed by [`RecordingSleeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pause {
    /// Emails accepted by the tracked mailer when the pause began
    /// (0 when no mailer is tracked)
    pub after_sends: usize,
    pub duration: Duration,
}

/// A [`Sleeper`] that returns immediately and records every request.
#[derive(Default)]
pub struct RecordingSleeper {
    pauses: Mutex<Vec<Pause>>,
    mailer: Option<LocalMailer>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also note how many emails `mailer` had accepted at each pause.
    pub fn tracking(mailer: &LocalMailer) -> Self {
        Self {
            pauses: Mutex::new(Vec::new()),
            mailer: Some(mailer.clone()),
        }
    }

    pub fn pauses(&self) -> Vec<Pause> {
        self.pauses.lock().clone()
    }

    /// Requested durations, in order.
    pub fn durations(&self) -> Vec<Duration> {
        self.pauses.lock().iter().map(|p| p.duration).collect()
    }

    pub fn total(&self) -> Duration {
        self.pauses.lock().iter().map(|p| p.duration).sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let after_sends = self.mailer.as_ref().map_or(0, |m| m.email_count());
        self.pauses.lock().push(Pause {
            after_sends,
            duration,
        });
    }
}
