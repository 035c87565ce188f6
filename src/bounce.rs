//! Post-hoc bounce reconciliation.
//!
//! After a batch has been submitted, failure notifications trickle back into
//! the sender's own mailbox. The reconciler waits a settle interval, opens a
//! retrieval session, pulls the most recent `K` messages (`K` = number of
//! attempted recipients), keeps the ones whose subject marks them as a
//! delivery failure, pulls the failing address out of each, and intersects
//! the result with the addresses this batch actually sent to.
//!
//! Reconciliation is best-effort. If the mailbox cannot be reached the report
//! is [`BounceReport::Undetermined`], never an empty list.
//!
//! Known limitation: "the last `K` messages" assumes no unrelated mail lands
//! in the mailbox during the settle window. Extra mail pushes real bounces
//! out of the window.

use async_trait::async_trait;
use mailparse::MailHeaderMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::Instrument;

use crate::address::normalize;
use crate::error::MailError;
use crate::throttle::Sleeper;

/// Default wait before the mailbox is checked.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(5);

/// Families of delivery-failure notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceKind {
    /// RFC 3464 DSN as sent by Exchange, Gmail, and most MTAs
    DeliveryStatusNotification,
    /// Postfix bounce
    UndeliveredMail,
}

/// Subject prefixes that mark a delivery-failure notification.
///
/// Matching is case-sensitive and anchored at the start of the subject. Add a
/// row here to recognise a new notification format.
pub const BOUNCE_SUBJECTS: &[(BounceKind, &str)] = &[
    (BounceKind::DeliveryStatusNotification, "Delivery Status Notification"),
    (BounceKind::UndeliveredMail, "Undelivered Mail Returned to Sender"),
];

/// Classify a `Subject` header value.
///
/// ```
/// use mailshot::bounce::{classify_subject, BounceKind};
///
/// assert_eq!(
///     classify_subject("Delivery Status Notification (Failure)"),
///     Some(BounceKind::DeliveryStatusNotification)
/// );
/// assert_eq!(classify_subject("Re: Delivery Status Notification"), None);
/// ```
pub fn classify_subject(subject: &str) -> Option<BounceKind> {
    let subject = subject.trim_start();
    BOUNCE_SUBJECTS
        .iter()
        .find(|(_, prefix)| subject.starts_with(prefix))
        .map(|(kind, _)| *kind)
}

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // local-part@domain with a 2-5 character final label
        Regex::new(r"(?i)[a-z0-9_.\-]+@[a-z0-9.\-]+\.[a-z.]{2,5}")
            .expect("address pattern is valid")
    })
}

/// The first address in `text` that is not in `ignore`, normalized.
///
/// `ignore` holds normalized addresses (typically the operator's own, which
/// every notification names as the original sender).
pub fn extract_address(text: &str, ignore: &[String]) -> Option<String> {
    address_pattern()
        .find_iter(text)
        .map(|m| normalize(m.as_str()))
        .find(|addr| !ignore.contains(addr))
}

/// A delivery-failure notification found in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounce {
    pub kind: BounceKind,
    /// Normalized address that could not be delivered to
    pub address: String,
}

/// Decode raw mailbox messages as UTF-8, dropping any that do not decode.
///
/// Notifications are plain ASCII, so a message that is not valid UTF-8 cannot
/// be one of interest.
pub fn decoded_messages<I>(raw: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    raw.into_iter().filter_map(|bytes| match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(_) => {
            tracing::trace!("Skipping mailbox message that is not valid UTF-8");
            None
        }
    })
}

/// Inspect one decoded message. Returns `None` unless it is a
/// delivery-failure notification naming an address outside `ignore`.
///
/// Only the headers are parsed. The failing address is taken from the raw
/// body; if none is found there (e.g. a base64-encoded report), the decoded
/// MIME parts are searched instead.
pub fn parse_notification(message: &str, ignore: &[String]) -> Option<Bounce> {
    let (headers, body_offset) = mailparse::parse_headers(message.as_bytes()).ok()?;
    let subject = headers.get_first_value("Subject")?;
    let kind = classify_subject(&subject)?;

    let body = message.get(body_offset..).unwrap_or_default();
    let address = extract_address(body, ignore).or_else(|| {
        let parsed = mailparse::parse_mail(message.as_bytes()).ok()?;
        parsed
            .parts()
            .filter_map(|part| part.get_body().ok())
            .find_map(|text| extract_address(&text, ignore))
    })?;

    Some(Bounce { kind, address })
}

/// Correlate mailbox content with the attempted addresses.
///
/// Returns the attempted addresses named by a notification, each once, in
/// the order their notifications appear in `raw`.
pub fn reconcile<I>(raw: I, attempted: &[String], ignore: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let attempted: HashSet<String> = attempted.iter().map(|a| normalize(a)).collect();
    let mut seen = HashSet::new();

    decoded_messages(raw)
        .filter_map(|message| parse_notification(&message, ignore))
        .filter_map(|bounce| {
            if attempted.contains(&bounce.address) {
                Some(bounce.address)
            } else {
                tracing::debug!(
                    address = %bounce.address,
                    kind = ?bounce.kind,
                    "Ignoring notification for an address outside this batch"
                );
                None
            }
        })
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Result of the bounce check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum BounceReport {
    /// The check ran; these attempted addresses bounced (empty: none did)
    Confirmed(Vec<String>),
    /// The check could not run; carries the reason
    Undetermined(String),
}

impl BounceReport {
    /// Bounced addresses, if the check ran.
    pub fn addresses(&self) -> Option<&[String]> {
        match self {
            Self::Confirmed(list) => Some(list),
            Self::Undetermined(_) => None,
        }
    }

    pub fn is_determined(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// An open mailbox-retrieval session.
#[async_trait]
pub trait Mailbox: Send {
    /// Number of messages in the mailbox.
    async fn count(&mut self) -> Result<usize, MailError>;

    /// Raw bytes of message `index` (1-indexed, oldest first).
    async fn retrieve(&mut self, index: usize) -> Result<Vec<u8>, MailError>;

    /// End the session. Called exactly once.
    async fn close(&mut self) -> Result<(), MailError>;
}

#[async_trait]
impl<M: Mailbox + ?Sized> Mailbox for Box<M> {
    async fn count(&mut self) -> Result<usize, MailError> {
        (**self).count().await
    }

    async fn retrieve(&mut self, index: usize) -> Result<Vec<u8>, MailError> {
        (**self).retrieve(index).await
    }

    async fn close(&mut self) -> Result<(), MailError> {
        (**self).close().await
    }
}

/// Fetch the `limit` most recent messages, newest first.
pub async fn fetch_recent<M>(mailbox: &mut M, limit: usize) -> Result<Vec<Vec<u8>>, MailError>
where
    M: Mailbox + ?Sized,
{
    let total = mailbox.count().await?;
    let oldest = total.saturating_sub(limit) + 1;

    let mut messages = Vec::with_capacity(limit.min(total));
    for index in (oldest..=total).rev() {
        messages.push(mailbox.retrieve(index).await?);
    }
    Ok(messages)
}

/// Runs the bounce check for one batch.
#[derive(Debug, Clone)]
pub struct BounceChecker {
    settle: Duration,
    ignore: Vec<String>,
}

impl Default for BounceChecker {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE)
    }
}

impl BounceChecker {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            ignore: Vec::new(),
        }
    }

    /// Never report `email` as bounced (the operator's own address).
    pub fn ignoring(mut self, email: &str) -> Self {
        self.ignore.push(normalize(email));
        self
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Wait, open the mailbox through `open`, and correlate.
    ///
    /// `open` is not polled until the settle interval has passed. With no
    /// attempted addresses nothing is waited for or opened.
    pub async fn check<M, F>(
        &self,
        open: F,
        attempted: &[String],
        sleeper: &dyn Sleeper,
    ) -> BounceReport
    where
        M: Mailbox,
        F: Future<Output = Result<M, MailError>>,
    {
        if attempted.is_empty() {
            tracing::debug!("Nothing was sent, skipping bounce check");
            return BounceReport::Confirmed(Vec::new());
        }

        let span = tracing::info_span!("mailshot.bounce_check", window = attempted.len());
        self.run(open, attempted, sleeper).instrument(span).await
    }

    async fn run<M, F>(&self, open: F, attempted: &[String], sleeper: &dyn Sleeper) -> BounceReport
    where
        M: Mailbox,
        F: Future<Output = Result<M, MailError>>,
    {
        tracing::info!(settle_secs = self.settle.as_secs(), "Checking for bounce-backs");
        sleeper.sleep(self.settle).await;

        let mut mailbox = match open.await {
            Ok(mailbox) => mailbox,
            Err(e) => {
                tracing::error!(error = %e, "Bounce check failed: cannot open mailbox");
                return BounceReport::Undetermined(e.to_string());
            }
        };
        tracing::info!("Connected to mailbox");

        let fetched = fetch_recent(&mut mailbox, attempted.len()).await;
        if let Err(e) = mailbox.close().await {
            tracing::warn!(error = %e, "Failed to close mailbox session");
        }

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "Bounce check failed while retrieving messages");
                return BounceReport::Undetermined(e.to_string());
            }
        };

        let bounced = reconcile(raw, attempted, &self.ignore);

        #[cfg(feature = "metrics")]
        metrics::counter!("mailshot_bounces_total").increment(bounced.len() as u64);

        if bounced.is_empty() {
            tracing::info!("No bounce-backs found, all emails were delivered");
        } else {
            for address in &bounced {
                tracing::warn!(to = %address, "Email bounced back");
            }
        }

        BounceReport::Confirmed(bounced)
    }
}
