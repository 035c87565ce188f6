//! Error types for mailshot.

use thiserror::Error;

/// Errors that can occur while preparing, sending, or reconciling a batch.
#[derive(Debug, Clone, Error)]
pub enum MailError {
    /// Configuration error (missing file, invalid value, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing required field (e.g., from address).
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Invalid email address format.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Error reading or processing attachment (generic).
    #[error("Attachment error: {0}")]
    AttachmentError(String),

    /// Attachment file not found.
    #[error("Attachment file not found: {0}")]
    AttachmentFileNotFound(String),

    /// Failed to read attachment file.
    #[error("Failed to read attachment: {0}")]
    AttachmentReadError(String),

    /// Error building the email message.
    #[error("Build error: {0}")]
    BuildError(String),

    /// Could not establish a session with the server (TCP, TLS, greeting).
    #[error("Connection error ({server}): {message}")]
    Connection { server: String, message: String },

    /// The server refused the account credentials.
    #[error("Authentication failed ({server}): {message}")]
    Authentication { server: String, message: String },

    /// Error sending the email.
    #[error("Send error: {0}")]
    SendError(String),

    /// The submission server rejected a single message.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Mailbox retrieval protocol error after the session was established.
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    TemplateError(String),

    /// A letter directory failed validation. Carries every issue found.
    #[error("Invalid letter: {}", .0.join("; "))]
    InvalidLetter(Vec<String>),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl MailError {
    /// Create a connection error for `server`.
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error for `server`.
    pub fn authentication(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole batch.
    ///
    /// Only failures to open the submission session are fatal; a rejected
    /// message is counted and the batch moves on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Authentication { .. } | Self::Configuration(_)
        )
    }
}

impl From<std::io::Error> for MailError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MailError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for MailError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<csv::Error> for MailError {
    fn from(err: csv::Error) -> Self {
        Self::InvalidLetter(vec![err.to_string()])
    }
}

impl From<mailparse::MailParseError> for MailError {
    fn from(err: mailparse::MailParseError) -> Self {
        Self::Mailbox(err.to_string())
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        Self::BuildError(err.to_string())
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        if err.is_permanent() || err.is_transient() {
            Self::Rejected(err.to_string())
        } else {
            Self::SendError(err.to_string())
        }
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::address::AddressError> for MailError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(MailError::connection("smtp.example.com:465", "refused").is_fatal());
        assert!(MailError::authentication("smtp.example.com:465", "535").is_fatal());
        assert!(!MailError::Rejected("550 no such user".into()).is_fatal());
        assert!(!MailError::Mailbox("-ERR".into()).is_fatal());
    }

    #[test]
    fn test_invalid_letter_lists_every_issue() {
        let err = MailError::InvalidLetter(vec!["empty name at row 2".into(), "bad email".into()]);
        assert_eq!(err.to_string(), "Invalid letter: empty name at row 2; bad email");
    }
}
