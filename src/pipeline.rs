//! The batch driver: send, throttle, close, reconcile.
//!
//! ```rust,ignore
//! use mailshot::{Batch, BounceChecker, TokioSleeper};
//! use mailshot::providers::{Pop3Mailbox, SmtpSession};
//!
//! let session = SmtpSession::open(&credentials, &config.smtp).await?;
//! let result = Batch::new(&TokioSleeper)
//!     .bounce_check(BounceChecker::new(config.batch.settle()))
//!     .run(session, letter.emails()?, Pop3Mailbox::connect(&credentials, &config.pop3))
//!     .await;
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::Instrument;

#[cfg(feature = "metrics")]
use std::time::Instant;

use crate::address::Address;
use crate::bounce::{BounceChecker, BounceReport, Mailbox};
use crate::email::Email;
use crate::error::MailError;
use crate::mailer::Mailer;
use crate::throttle::{Sleeper, Throttle};
use crate::tracker::{DeliveryTracker, FailedDelivery, SendOutcome};

/// Final report of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedDelivery>,
    pub bounced: BounceReport,
}

impl BatchResult {
    pub fn new(tracker: &DeliveryTracker, bounced: BounceReport) -> Self {
        Self {
            attempted: tracker.attempted(),
            succeeded: tracker.succeeded(),
            failed: tracker.failures().to_vec(),
            bounced,
        }
    }

    /// Every message accepted and no confirmed bounce.
    pub fn is_clean(&self) -> bool {
        self.succeeded == self.attempted
            && self.bounced.addresses().is_some_and(|list| list.is_empty())
    }
}

fn validate(email: &Email) -> Result<(), MailError> {
    if email.from.is_none() {
        return Err(MailError::MissingField("from"));
    }
    if email.envelope_recipients().is_empty() {
        return Err(MailError::MissingField("to"));
    }
    Ok(())
}

/// Batch settings. Borrowing the sleeper keeps tests in control of time.
pub struct Batch<'a> {
    throttle: Throttle,
    sleeper: &'a dyn Sleeper,
    test_recipient: Option<Address>,
    bounce: Option<BounceChecker>,
}

impl<'a> Batch<'a> {
    /// Default throttle, no test mode, no bounce check.
    pub fn new(sleeper: &'a dyn Sleeper) -> Self {
        Self {
            throttle: Throttle::default(),
            sleeper,
            test_recipient: None,
            bounce: None,
        }
    }

    pub fn throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Test mode: send only the first message, to `operator` alone.
    pub fn test_mode(mut self, operator: impl Into<Address>) -> Self {
        self.test_recipient = Some(operator.into());
        self
    }

    /// Reconcile bounces with `checker` after sending.
    pub fn bounce_check(mut self, checker: BounceChecker) -> Self {
        self.bounce = Some(checker);
        self
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_recipient.is_some()
    }

    /// Submit `emails` through `mailer`, then close it.
    ///
    /// Rejections are counted and the loop moves on. The session is closed
    /// once the loop ends; a close error is logged and does not change the
    /// counts.
    pub async fn send<M, I>(&self, mailer: &mut M, emails: I) -> DeliveryTracker
    where
        M: Mailer + ?Sized,
        I: IntoIterator<Item = Email>,
    {
        let span = tracing::info_span!(
            "mailshot.batch",
            provider = mailer.provider_name(),
            test_mode = self.is_test_mode(),
        );
        self.send_inner(mailer, emails).instrument(span).await
    }

    async fn send_inner<M, I>(&self, mailer: &mut M, emails: I) -> DeliveryTracker
    where
        M: Mailer + ?Sized,
        I: IntoIterator<Item = Email>,
    {
        let provider = mailer.provider_name();
        let mut tracker = DeliveryTracker::new();

        let limit = match &self.test_recipient {
            Some(operator) => {
                tracing::info!(to = %operator.email, "Test mode: sending one message to the operator");
                1
            }
            None => usize::MAX,
        };
        let emails = emails.into_iter().take(limit).map(|email| match &self.test_recipient {
            Some(operator) => email.redirect_to(operator.clone()),
            None => email,
        });

        for email in emails {
            let to = email.to_header();
            let count = tracker.begin(email.to.iter().map(|a| a.email.as_str()));

            #[cfg(feature = "metrics")]
            let start = Instant::now();

            let result = match validate(&email) {
                Ok(()) => mailer.deliver(&email).await,
                Err(e) => Err(e),
            };

            #[cfg(feature = "metrics")]
            {
                let status = if result.is_ok() { "success" } else { "error" };
                metrics::counter!("mailshot_emails_total", "provider" => provider, "status" => status)
                    .increment(1);
                metrics::histogram!("mailshot_delivery_duration_seconds", "provider" => provider)
                    .record(start.elapsed().as_secs_f64());
            }

            let outcome = match result {
                Ok(receipt) => {
                    tracing::info!(
                        to = %to,
                        count,
                        message_id = %receipt.message_id,
                        "Email sent to {}",
                        to
                    );
                    SendOutcome::Sent
                }
                Err(e) => {
                    tracing::error!(to = %to, count, error = %e, "Failed to send email to {}", to);
                    SendOutcome::Failed(e.to_string())
                }
            };
            tracker.record(&to, &outcome);

            let pause = self.throttle.pause_duration(count);
            if !pause.is_zero() {
                tracing::info!(
                    count,
                    pause_secs = pause.as_secs(),
                    "Pausing for {} seconds to avoid being blocked by the server",
                    pause.as_secs()
                );
                self.sleeper.sleep(pause).await;
            }
        }

        if let Err(e) = mailer.close().await {
            tracing::warn!(provider, error = %e, "Failed to close submission session");
        }

        tracing::info!(
            attempted = tracker.attempted(),
            succeeded = tracker.succeeded(),
            "Sent {} of {} emails",
            tracker.succeeded(),
            tracker.attempted()
        );
        tracker
    }

    /// Send, close the session, then run the bounce check (if configured).
    ///
    /// `open_mailbox` is only polled after the submission session is closed
    /// and the settle interval has passed. Without a configured checker the
    /// bounce report is [`BounceReport::Undetermined`].
    pub async fn run<M, I, B, F>(&self, mut mailer: M, emails: I, open_mailbox: F) -> BatchResult
    where
        M: Mailer,
        I: IntoIterator<Item = Email>,
        B: Mailbox,
        F: Future<Output = Result<B, MailError>>,
    {
        let tracker = self.send(&mut mailer, emails).await;
        drop(mailer);

        let bounced = match &self.bounce {
            Some(checker) => checker.check(open_mailbox, tracker.addresses(), self.sleeper).await,
            None => BounceReport::Undetermined("bounce check skipped".into()),
        };

        BatchResult::new(&tracker, bounced)
    }
}
