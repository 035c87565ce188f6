//! Email struct with builder pattern.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::attachment::Attachment;

/// A single outgoing message.
///
/// Built once per recipient by the [`Letter`](crate::Letter) and consumed
/// exactly once by a [`Mailer`](crate::Mailer).
///
/// ```
/// use mailshot::Email;
///
/// let email = Email::new()
///     .from(("Jane Doe", "jane@example.com"))
///     .to("prof@example.org")
///     .subject("Invitation")
///     .html_body("<p>Dear Prof,</p>");
///
/// assert_eq!(email.envelope_recipients().len(), 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Email {
    /// Sender address
    pub from: Option<Address>,
    /// Primary recipients
    pub to: Vec<Address>,
    /// Carbon copy recipients
    pub cc: Vec<Address>,
    /// Blind carbon copy recipients
    pub bcc: Vec<Address>,
    /// Email subject line
    pub subject: String,
    /// Rendered HTML body
    pub html_body: Option<String>,
    /// File attachments
    pub attachments: Vec<Attachment>,
    /// `Date` header; set when the message is built
    pub date: Option<DateTime<Local>>,
}

impl Email {
    /// Create a new empty email.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender address.
    pub fn from(mut self, addr: impl Into<Address>) -> Self {
        self.from = Some(addr.into());
        self
    }

    /// Add a recipient.
    pub fn to(mut self, addr: impl Into<Address>) -> Self {
        self.to.push(addr.into());
        self
    }

    /// Add a CC recipient.
    pub fn cc(mut self, addr: impl Into<Address>) -> Self {
        self.cc.push(addr.into());
        self
    }

    /// Replace all CC recipients.
    pub fn put_cc(mut self, addrs: Vec<Address>) -> Self {
        self.cc = addrs;
        self
    }

    /// Add a BCC recipient.
    pub fn bcc(mut self, addr: impl Into<Address>) -> Self {
        self.bcc.push(addr.into());
        self
    }

    /// Replace all BCC recipients.
    pub fn put_bcc(mut self, addrs: Vec<Address>) -> Self {
        self.bcc = addrs;
        self
    }

    /// Set the subject line.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the HTML body.
    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Add an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Set the `Date` header.
    pub fn date(mut self, date: DateTime<Local>) -> Self {
        self.date = Some(date);
        self
    }

    /// Send this message to `addr` only.
    ///
    /// Used by test mode: the `To` list is replaced and copies are dropped so
    /// nobody but the operator receives the trial message.
    pub fn redirect_to(mut self, addr: impl Into<Address>) -> Self {
        self.to = vec![addr.into()];
        self.cc.clear();
        self.bcc.clear();
        self
    }

    /// Check if the email has all required fields for sending.
    pub fn is_valid(&self) -> bool {
        self.from.is_some() && !self.envelope_recipients().is_empty()
    }

    /// Every address the message is submitted to (to + cc + bcc).
    pub fn envelope_recipients(&self) -> Vec<&Address> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .collect()
    }

    /// The `To` header as a comma-joined list, for status lines.
    pub fn to_header(&self) -> String {
        self.to
            .iter()
            .map(|a| a.email.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}
