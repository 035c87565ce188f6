//! SMTP submission session using lettre.
//!
//! Unlike a pooled transport, [`SmtpSession`] holds exactly one connection
//! for the whole batch: connect, upgrade, authenticate once, then one
//! `MAIL FROM`/`RCPT TO`/`DATA` exchange per message and a single `QUIT`.
//!
//! A refused message is answered with `RSET` so the connection stays usable
//! for the rest of the batch. A message goes out as long as the server
//! accepts at least one of its envelope recipients.
//!
//! # Example
//!
//! ```rust,ignore
//! use mailshot::config::{Credentials, Endpoint, TlsMode};
//! use mailshot::providers::SmtpSession;
//!
//! let endpoint = Endpoint::new("smtps.ntu.edu.tw", 465).tls(TlsMode::Tls);
//! let mut session = SmtpSession::open(&Credentials::new("b09901001", "pw"), &endpoint).await?;
//! ```

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment as LettreAttachment, Mailbox, MultiPart, SinglePart},
    address::Envelope,
    transport::smtp::{
        authentication::{Credentials as SmtpCredentials, Mechanism},
        client::{AsyncSmtpConnection, TlsParameters},
        commands::{Data, Mail, Rcpt, Rset},
        extension::{ClientId, Extension, MailBodyParameter, MailParameter},
        response::Response,
    },
    Message,
};

use crate::address::Address;
use crate::config::{Credentials, Endpoint, TlsMode};
use crate::email::Email;
use crate::error::MailError;
use crate::mailer::{DeliveryResult, Mailer};

/// One authenticated SMTP connection.
pub struct SmtpSession {
    connection: AsyncSmtpConnection,
    server: String,
    closed: bool,
}

impl SmtpSession {
    /// Connect, secure, and log in.
    ///
    /// Implicit TLS wraps the socket from the start. With
    /// [`TlsMode::StartTls`] the server must advertise `STARTTLS`; the
    /// session never falls back to plain text. Any failure here is fatal for
    /// the batch.
    pub async fn open(credentials: &Credentials, endpoint: &Endpoint) -> Result<Self, MailError> {
        let server = endpoint.address();
        let hello = ClientId::default();

        let tls = match endpoint.tls {
            TlsMode::None => None,
            TlsMode::StartTls | TlsMode::Tls => Some(
                TlsParameters::new(endpoint.host.clone())
                    .map_err(|e| MailError::connection(&server, e.to_string()))?,
            ),
        };

        tracing::debug!(server = %server, tls = ?endpoint.tls, "Connecting to SMTP server");

        let wrapped = match endpoint.tls {
            TlsMode::Tls => tls.clone(),
            _ => None,
        };
        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (endpoint.host.as_str(), endpoint.port),
            Some(endpoint.timeout()),
            &hello,
            wrapped,
            None,
        )
        .await
        .map_err(|e| MailError::connection(&server, e.to_string()))?;

        if endpoint.tls == TlsMode::StartTls {
            if !connection.can_starttls() {
                connection.abort().await;
                return Err(MailError::connection(
                    &server,
                    "server does not advertise STARTTLS",
                ));
            }
            if let Some(params) = tls {
                connection
                    .starttls(params, &hello)
                    .await
                    .map_err(|e| MailError::connection(&server, e.to_string()))?;
            }
        }

        let login = SmtpCredentials::new(credentials.userid.clone(), credentials.password.clone());
        if let Err(e) = connection.auth(&[Mechanism::Plain, Mechanism::Login], &login).await {
            connection.abort().await;
            return Err(MailError::authentication(&server, e.to_string()));
        }

        tracing::info!(server = %server, "Connected to SMTP server");
        Ok(Self {
            connection,
            server,
            closed: false,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// One `MAIL FROM`/`RCPT TO`/`DATA` exchange.
    async fn transaction(&mut self, envelope: &Envelope, body: &[u8]) -> Result<Response, MailError> {
        let mut options = Vec::new();
        if !body.is_ascii()
            && self
                .connection
                .server_info()
                .supports_feature(Extension::EightBitMime)
        {
            options.push(MailParameter::Body(MailBodyParameter::EightBitMime));
        }
        self.connection
            .command(Mail::new(envelope.from().cloned(), options))
            .await?;

        let mut refused = None;
        let mut accepted = 0;
        for to in envelope.to() {
            match self.connection.command(Rcpt::new(to.clone(), Vec::new())).await {
                Ok(_) => accepted += 1,
                Err(e) if e.is_permanent() || e.is_transient() => {
                    tracing::warn!(server = %self.server, to = %to, error = %e, "Recipient refused");
                    refused.get_or_insert(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        if accepted == 0 {
            return Err(match refused {
                Some(e) => e.into(),
                None => MailError::MissingField("to"),
            });
        }

        self.connection.command(Data).await?;
        Ok(self.connection.message(body).await?)
    }

    /// Clear a refused transaction so the next message starts clean.
    async fn reset(&mut self) {
        if let Err(e) = self.connection.command(Rset).await {
            tracing::warn!(server = %self.server, error = %e, "RSET failed");
        }
    }
}

/// Build a lettre Message from our Email struct.
fn build_message(email: &Email) -> Result<Message, MailError> {
    let from = email
        .from
        .as_ref()
        .ok_or(MailError::MissingField("from"))?;

    if email.to.is_empty() {
        return Err(MailError::MissingField("to"));
    }

    let mut builder = Message::builder()
        .from(address_to_mailbox(from)?)
        .subject(&email.subject);

    if let Some(date) = email.date {
        builder = builder.date(date.into());
    }

    // Bcc lands in the envelope only; lettre strips the header.
    for to in &email.to {
        builder = builder.to(address_to_mailbox(to)?);
    }
    for cc in &email.cc {
        builder = builder.cc(address_to_mailbox(cc)?);
    }
    for bcc in &email.bcc {
        builder = builder.bcc(address_to_mailbox(bcc)?);
    }

    let html = email.html_body.clone().unwrap_or_default();

    let message = if email.attachments.is_empty() {
        builder.header(ContentType::TEXT_HTML).body(html)?
    } else {
        let mut multipart = MultiPart::mixed().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html),
        );

        for attachment in &email.attachments {
            let content_type: ContentType = attachment
                .content_type
                .parse()
                .unwrap_or(ContentType::TEXT_PLAIN);

            multipart = multipart.singlepart(
                LettreAttachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }

        builder.multipart(multipart)?
    };

    Ok(message)
}

#[async_trait]
impl Mailer for SmtpSession {
    async fn deliver(&mut self, email: &Email) -> Result<DeliveryResult, MailError> {
        let message = build_message(email)?;

        if self.closed || self.connection.has_broken() {
            return Err(MailError::SendError(format!(
                "SMTP session to {} is no longer open",
                self.server
            )));
        }

        let response = match self.transaction(message.envelope(), &message.formatted()).await {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, MailError::Rejected(_)) {
                    self.reset().await;
                }
                return Err(e);
            }
        };

        // Extract message ID from SMTP response, or generate one
        let message_id = response
            .message()
            .next()
            .and_then(|m| m.lines().next())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let line = format!("{} {}", response.code(), response.message().collect::<Vec<_>>().join(" "));

        Ok(DeliveryResult::with_response(message_id, line))
    }

    async fn close(&mut self) -> Result<(), MailError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.connection.quit().await {
            Ok(_) => {
                tracing::debug!(server = %self.server, "SMTP session closed");
                Ok(())
            }
            Err(e) => {
                self.connection.abort().await;
                Err(MailError::SendError(format!("QUIT failed: {}", e)))
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "smtp"
    }
}

/// Convert our Address to lettre's Mailbox.
fn address_to_mailbox(addr: &Address) -> Result<Mailbox, MailError> {
    let email = addr
        .to_ascii()?
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress(e.to_string()))?;

    Ok(Mailbox::new(addr.name.clone(), email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Attachment;

    fn sample() -> Email {
        Email::new()
            .from(("Jane Doe", "jane@example.org"))
            .to("prof@example.edu")
            .cc("ta@example.edu")
            .bcc("archive@example.org")
            .subject("Invitation")
            .html_body("<p>Dear Prof</p>")
    }

    #[test]
    fn test_envelope_includes_every_recipient() {
        let message = build_message(&sample()).unwrap();
        let mut rcpts: Vec<String> = message.envelope().to().iter().map(|a| a.to_string()).collect();
        rcpts.sort();
        assert_eq!(rcpts, vec!["archive@example.org", "prof@example.edu", "ta@example.edu"]);
    }

    #[test]
    fn test_bcc_header_is_not_sent() {
        let message = build_message(&sample()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: prof@example.edu"));
        assert!(!raw.contains("archive@example.org"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_attachments_make_multipart() {
        let email = sample().attachment(Attachment::from_bytes("agenda.pdf", b"%PDF-1.4".to_vec()));
        let raw = String::from_utf8(build_message(&email).unwrap().formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("agenda.pdf"));
    }

    #[test]
    fn test_missing_from() {
        let err = build_message(&Email::new().to("a@example.org")).unwrap_err();
        assert!(matches!(err, MailError::MissingField("from")));
    }
}
