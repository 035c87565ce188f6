//! POP3 retrieval session (RFC 1939) over tokio, with TLS via rustls.
//!
//! Only what the bounce check needs: `USER`/`PASS` login, `STAT`, `RETR`,
//! `QUIT`, and the `STLS` upgrade (RFC 2595).

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::bounce::Mailbox;
use crate::config::{Credentials, Endpoint, TlsMode};
use crate::error::MailError;

/// Longest line accepted from the server (RFC 1939 allows 512 for status
/// lines; message lines are not bounded, so be generous).
const MAX_LINE: usize = 64 * 1024;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// The first line of a server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Ok(String),
    Err(String),
}

fn parse_reply(line: &str) -> Result<Reply, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix("+OK") {
        Ok(Reply::Ok(rest.trim_start().to_string()))
    } else if let Some(rest) = line.strip_prefix("-ERR") {
        Ok(Reply::Err(rest.trim_start().to_string()))
    } else {
        Err(format!("unexpected reply: {}", line))
    }
}

/// Message count from a `STAT` reply text (`"nn mm"`).
fn parse_stat(text: &str) -> Option<usize> {
    text.split_whitespace().next()?.parse().ok()
}

fn tls_connector() -> Result<TlsConnector, String> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::warn!(errors = ?native.errors, "Some certificates could not be loaded");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::trace!(added, ignored, "Loaded native root certificates");

    let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| e.to_string())?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn wrap_tls(stream: TcpStream, host: &str) -> Result<Box<dyn Stream>, String> {
    let connector = tls_connector()?;
    let name = ServerName::try_from(host.to_string()).map_err(|e| format!("invalid host name: {}", e))?;
    let tls = connector
        .connect(name, stream)
        .await
        .map_err(|e| format!("TLS handshake failed: {}", e))?;
    Ok(Box::new(tls))
}

async fn within<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, String>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{}: {}", what, e)),
        Err(_) => Err(format!("{}: timed out after {}s", what, limit.as_secs())),
    }
}

/// Line-oriented POP3 connection.
struct Connection<S> {
    stream: BufReader<S>,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, String> {
        let mut line = Vec::new();
        let n = within(self.timeout, "read", self.stream.read_until(b'\n', &mut line)).await?;
        if n == 0 {
            return Err("connection closed by server".into());
        }
        if line.len() > MAX_LINE {
            return Err(format!("line exceeds {} bytes", MAX_LINE));
        }
        Ok(line)
    }

    async fn reply(&mut self) -> Result<Reply, String> {
        let line = self.read_line().await?;
        parse_reply(&String::from_utf8_lossy(&line))
    }

    async fn greeting(&mut self) -> Result<(), String> {
        match self.reply().await? {
            Reply::Ok(_) => Ok(()),
            Reply::Err(e) => Err(format!("greeting: {}", e)),
        }
    }

    async fn command(&mut self, command: &str) -> Result<Reply, String> {
        let data = format!("{}\r\n", command);
        let stream = self.stream.get_mut();
        within(self.timeout, "write", async {
            stream.write_all(data.as_bytes()).await?;
            stream.flush().await
        })
        .await?;
        self.reply().await
    }

    /// Read a dot-terminated multi-line body, undoing byte-stuffing.
    /// Lines are joined with CRLF.
    async fn multiline(&mut self) -> Result<Vec<u8>, String> {
        let mut body: Vec<u8> = Vec::new();
        let mut first = true;
        loop {
            let mut line = self.read_line().await?;
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if line == b"." {
                return Ok(body);
            }
            let content = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
            if !first {
                body.extend_from_slice(b"\r\n");
            }
            body.extend_from_slice(content);
            first = false;
        }
    }

    fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// An authenticated POP3 session.
pub struct Pop3Mailbox {
    connection: Connection<Box<dyn Stream>>,
    server: String,
    closed: bool,
}

impl Pop3Mailbox {
    /// Connect, secure, and log in with `USER`/`PASS`.
    ///
    /// Everything up to a successful `PASS` counts as connecting; the bounce
    /// check treats any error from here as "undetermined".
    pub async fn connect(credentials: &Credentials, endpoint: &Endpoint) -> Result<Self, MailError> {
        let server = endpoint.address();
        let timeout = endpoint.timeout();
        let fail = |message: String| MailError::connection(&server, message);

        tracing::debug!(server = %server, tls = ?endpoint.tls, "Connecting to POP3 server");

        let tcp = within(
            timeout,
            "connect",
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(fail)?;

        // With STLS the greeting is read before the upgrade.
        let (stream, greeted): (Box<dyn Stream>, bool) = match endpoint.tls {
            TlsMode::Tls => (wrap_tls(tcp, &endpoint.host).await.map_err(fail)?, false),
            TlsMode::None => (Box::new(tcp), false),
            TlsMode::StartTls => {
                let mut plain = Connection::new(tcp, timeout);
                plain.greeting().await.map_err(fail)?;
                match plain.command("STLS").await.map_err(fail)? {
                    Reply::Ok(_) => {}
                    Reply::Err(e) => return Err(fail(format!("STLS refused: {}", e))),
                }
                let tls = wrap_tls(plain.into_inner(), &endpoint.host)
                    .await
                    .map_err(fail)?;
                (tls, true)
            }
        };

        let mut connection = Connection::new(stream, timeout);
        if !greeted {
            connection.greeting().await.map_err(fail)?;
        }

        let mut mailbox = Self {
            connection,
            server: server.clone(),
            closed: false,
        };
        mailbox.login(credentials).await?;
        Ok(mailbox)
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<(), MailError> {
        let server = self.server.clone();
        for command in [
            format!("USER {}", credentials.userid),
            format!("PASS {}", credentials.password),
        ] {
            match self
                .connection
                .command(&command)
                .await
                .map_err(|e| MailError::connection(&server, e))?
            {
                Reply::Ok(_) => {}
                Reply::Err(e) => return Err(MailError::authentication(&server, e)),
            }
        }
        tracing::info!(server = %server, "Logged in to POP3 server");
        Ok(())
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    async fn expect_ok(&mut self, command: &str) -> Result<String, MailError> {
        match self.connection.command(command).await.map_err(MailError::Mailbox)? {
            Reply::Ok(text) => Ok(text),
            Reply::Err(text) => Err(MailError::Mailbox(format!("-ERR {}", text))),
        }
    }
}

#[async_trait]
impl Mailbox for Pop3Mailbox {
    async fn count(&mut self) -> Result<usize, MailError> {
        let text = self.expect_ok("STAT").await?;
        parse_stat(&text).ok_or_else(|| MailError::Mailbox(format!("bad STAT reply: {}", text)))
    }

    async fn retrieve(&mut self, index: usize) -> Result<Vec<u8>, MailError> {
        self.expect_ok(&format!("RETR {}", index)).await?;
        self.connection.multiline().await.map_err(MailError::Mailbox)
    }

    async fn close(&mut self) -> Result<(), MailError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.expect_ok("QUIT").await?;
        tracing::debug!(server = %self.server, "POP3 session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("+OK 2 320\r\n"), Ok(Reply::Ok("2 320".into())));
        assert_eq!(parse_reply("+OK\r\n"), Ok(Reply::Ok(String::new())));
        assert_eq!(
            parse_reply("-ERR [AUTH] invalid password\r\n"),
            Ok(Reply::Err("[AUTH] invalid password".into()))
        );
        assert!(parse_reply("* OK IMAP4rev1\r\n").is_err());
    }

    #[test]
    fn test_parse_stat() {
        assert_eq!(parse_stat("7 8812"), Some(7));
        assert_eq!(parse_stat("0 0"), Some(0));
        assert_eq!(parse_stat("lots"), None);
    }

    #[tokio::test]
    async fn test_multiline_unstuffs_dots() {
        let (client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(b"Subject: hi\r\n\r\n..leading dot\r\nplain\r\n.\r\n")
            .await
            .unwrap();

        let mut connection = Connection::new(client, Duration::from_secs(1));
        let body = connection.multiline().await.unwrap();
        assert_eq!(body, b"Subject: hi\r\n\r\n.leading dot\r\nplain");
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut connection = Connection::new(client, Duration::from_millis(20));
        let err = connection.reply().await.unwrap_err();
        assert!(err.contains("timed out"));
    }
}
