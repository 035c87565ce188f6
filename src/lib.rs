//! # mailshot
//!
//! Send one personalised HTML email per row of a recipient list over a
//! single SMTP session, pacing submission so the server does not block
//! the account, then read the POP3 inbox to report which addresses
//! bounced.
//!
//! ## Quick Start
//!
//! ```bash
//! mailshot create invitations        # scaffold a letter directory
//! $EDITOR invitations/content.html   # write the body, use $name / ${field}
//! mailshot check invitations
//! mailshot send invitations --test   # one message, to yourself
//! mailshot send invitations
//! ```
//!
//! ## Library Use
//!
//! ```rust,ignore
//! use mailshot::{Batch, BounceChecker, Letter, MailerConfig, TokioSleeper};
//! use mailshot::providers::{Pop3Mailbox, SmtpSession};
//!
//! let config = MailerConfig::load("mailshot.toml")?;
//! let letter = Letter::load("invitations", &config.account)?;
//! let credentials = config.account.credentials();
//!
//! let session = SmtpSession::open(&credentials, &config.smtp).await?;
//! let result = Batch::new(&TokioSleeper)
//!     .bounce_check(BounceChecker::new(config.batch.settle()))
//!     .run(session, letter.emails()?, Pop3Mailbox::connect(&credentials, &config.pop3))
//!     .await;
//!
//! println!("{}/{} sent, bounced: {:?}", result.succeeded, result.attempted, result.bounced);
//! ```
//!
//! ## Feature Flags
//!
//! - `smtp` - SMTP submission via lettre
//! - `pop3` - POP3 retrieval for the bounce check
//! - `local` - `LocalMailer`/`LocalMailbox` doubles and test assertions (opt-in)
//! - `metrics` - Prometheus-style metrics (counters/histograms)
//! - `cli` - the `mailshot` binary and its log subscriber
//!
//! ## Metrics
//!
//! Enable `features = ["metrics"]` to emit:
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `mailshot_emails_total` | Counter | provider, status | Submissions attempted |
//! | `mailshot_delivery_duration_seconds` | Histogram | provider | Time per submission |
//! | `mailshot_bounces_total` | Counter | | Confirmed bounced addresses |
//!
//! Install a recorder (e.g., `metrics-exporter-prometheus`) in your app to collect them.

/// The version of the mailshot crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod address;
mod attachment;
pub mod bounce;
pub mod config;
mod email;
mod error;
pub mod letter;
mod mailer;
mod pipeline;
pub mod providers;
pub mod recipient;
mod template;
pub mod throttle;
mod tracker;

#[cfg(feature = "local")]
mod storage;

#[cfg(feature = "local")]
pub mod testing;

#[cfg(feature = "cli")]
pub mod logging;

// Re-exports
pub use address::Address;
pub use attachment::Attachment;
pub use bounce::{BounceChecker, BounceReport, Mailbox};
pub use config::{Account, Credentials, Endpoint, MailerConfig, TlsMode};
pub use email::Email;
pub use error::MailError;
pub use letter::{Letter, LetterConfig};
pub use mailer::{DeliveryResult, Mailer};
pub use pipeline::{Batch, BatchResult};
pub use recipient::Recipient;
pub use template::Template;
pub use throttle::{Sleeper, Throttle, ThrottleRule, TokioSleeper};
pub use tracker::{DeliveryTracker, FailedDelivery, SendOutcome};

#[cfg(feature = "local")]
pub use storage::{MemoryStorage, MessageStore, Storage, StoredEmail};

/// Everything a typical batch needs in one import.
pub mod prelude {
    pub use crate::{
        Address, Attachment, Batch, BatchResult, BounceChecker, BounceReport, Email, Letter,
        MailError, Mailer, MailerConfig, Throttle, TokioSleeper,
    };
}
