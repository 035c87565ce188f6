//! Session and mailbox implementations.
//!
//! Submission sessions implement [`Mailer`](crate::Mailer); retrieval
//! sessions implement [`Mailbox`](crate::bounce::Mailbox).
//!
//! ## Available Providers
//!
//! | Provider | Feature Flag | Description |
//! |----------|-------------|-------------|
//! | [`SmtpSession`] | `smtp` | SMTP submission via lettre |
//! | [`Pop3Mailbox`] | `pop3` | POP3 retrieval over tokio + rustls |
//! | [`LocalMailer`] / [`LocalMailbox`] | `local` | In-memory doubles for dev/testing |
//! | [`LoggerMailer`] | (none) | Logs emails without sending |

#[cfg(feature = "smtp")]
mod smtp;
#[cfg(feature = "smtp")]
pub use smtp::SmtpSession;

#[cfg(feature = "pop3")]
mod pop3;
#[cfg(feature = "pop3")]
pub use pop3::Pop3Mailbox;

#[cfg(feature = "local")]
mod local;
#[cfg(feature = "local")]
pub use local::{notification, LocalMailbox, LocalMailer};

mod logger;
pub use logger::LoggerMailer;
