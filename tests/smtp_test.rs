//! SMTP session tests against a scripted plain-text server.

use std::time::Duration;

use mailshot::config::{Credentials, Endpoint, TlsMode};
use mailshot::providers::SmtpSession;
use mailshot::testing::RecordingSleeper;
use mailshot::{Batch, Email, MailError, Mailer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const REFUSED: &str = "bad@example.org";

/// Serve one session and return the commands received.
///
/// `RCPT TO:<bad@example.org>` gets a 550; everything else is accepted.
async fn serve(extensions: &'static [&'static str]) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut commands = Vec::new();
        let mut queued = 0;

        write.write_all(b"220 mail.school.edu ESMTP\r\n").await.unwrap();

        while let Ok(Some(line)) = lines.next_line().await {
            commands.push(line.clone());
            let verb = line.split(' ').next().unwrap_or_default().to_ascii_uppercase();
            let reply = match verb.as_str() {
                "EHLO" => {
                    let mut reply = String::from("250-mail.school.edu\r\n");
                    for (i, extension) in extensions.iter().enumerate() {
                        let sep = if i + 1 == extensions.len() { ' ' } else { '-' };
                        reply.push_str(&format!("250{}{}\r\n", sep, extension));
                    }
                    if extensions.is_empty() {
                        reply = "250 mail.school.edu\r\n".to_string();
                    }
                    reply
                }
                "AUTH" => "235 2.7.0 Authentication successful\r\n".to_string(),
                "MAIL" => "250 2.1.0 Ok\r\n".to_string(),
                "RCPT" if line.contains(&format!("<{}>", REFUSED)) => {
                    "550 5.1.1 <bad@example.org>: Recipient address rejected\r\n".to_string()
                }
                "RCPT" => "250 2.1.5 Ok\r\n".to_string(),
                "DATA" => {
                    write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await.unwrap();
                    while let Ok(Some(body)) = lines.next_line().await {
                        if body == "." {
                            break;
                        }
                    }
                    queued += 1;
                    format!("250 2.0.0 Ok: queued as Q{}\r\n", queued)
                }
                "RSET" => "250 2.0.0 Ok\r\n".to_string(),
                "QUIT" => {
                    write.write_all(b"221 2.0.0 Bye\r\n").await.unwrap();
                    break;
                }
                _ => "502 5.5.2 Command not recognized\r\n".to_string(),
            };
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        commands
    });

    (port, handle)
}

fn endpoint(port: u16, tls: TlsMode) -> Endpoint {
    Endpoint::new("127.0.0.1", port).tls(tls).timeout_secs(5)
}

fn credentials() -> Credentials {
    Credentials::new("wang.wei", "secret")
}

fn invitation(to: &str) -> Email {
    Email::new()
        .from(("Wang Wei", "wang.wei@school.edu"))
        .to(to)
        .subject("Seminar invitation")
        .html_body("<p>Dear guest,</p>")
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn refused_recipient_does_not_end_the_session() {
    let (port, server) = serve(&["AUTH PLAIN LOGIN", "8BITMIME"]).await;
    let mut session = SmtpSession::open(&credentials(), &endpoint(port, TlsMode::None))
        .await
        .unwrap();
    let sleeper = RecordingSleeper::new();

    let emails = vec![
        invitation("a@example.org"),
        invitation(REFUSED),
        invitation("c@example.org"),
    ];
    let tracker = Batch::new(&sleeper).send(&mut session, emails).await;

    assert_eq!(tracker.attempted(), 3);
    assert_eq!(tracker.succeeded(), 2);
    assert_eq!(tracker.failures().len(), 1);
    assert_eq!(tracker.failures()[0].to, REFUSED);
    assert!(tracker.failures()[0].reason.contains("550"), "{:?}", tracker.failures());

    let commands = server.await.unwrap();
    let verbs: Vec<&str> = commands
        .iter()
        .map(|c| c.split([' ', ':']).next().unwrap_or_default())
        .collect();
    assert_eq!(
        verbs,
        vec![
            "EHLO", "AUTH", //
            "MAIL", "RCPT", "DATA", //
            "MAIL", "RCPT", "RSET", //
            "MAIL", "RCPT", "DATA", //
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn message_goes_out_when_one_copy_is_refused() {
    let (port, server) = serve(&["AUTH PLAIN LOGIN"]).await;
    let mut session = SmtpSession::open(&credentials(), &endpoint(port, TlsMode::None))
        .await
        .unwrap();

    let result = session
        .deliver(&invitation("a@example.org").cc(REFUSED))
        .await
        .unwrap();
    assert_eq!(result.message_id, "2.0.0 Ok: queued as Q1");

    session.close().await.unwrap();
    let commands = server.await.unwrap();
    assert!(commands.iter().any(|c| c == "DATA"));
    assert!(!commands.iter().any(|c| c == "RSET"));
}

#[tokio::test]
async fn starttls_is_required_when_configured() {
    let (port, server) = serve(&["AUTH PLAIN LOGIN"]).await;

    let err = SmtpSession::open(&credentials(), &endpoint(port, TlsMode::StartTls))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, MailError::Connection { .. }), "{:?}", err);
    assert!(err.is_fatal());

    // Credentials never reach a plain-text connection
    let commands = match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(joined) => joined.unwrap(),
        Err(_) => Vec::new(),
    };
    assert!(!commands.iter().any(|c| c.starts_with("AUTH")), "{:?}", commands);
}
