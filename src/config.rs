//! Account and server configuration.
//!
//! Loaded from a TOML file (default `mailshot.toml`):
//!
//! ```toml
//! [account]
//! userid = "b09901001"
//! password = "hunter2"
//! name = "Jane Doe"
//! domain = "ntu.edu.tw"
//!
//! [smtp]
//! host = "smtps.ntu.edu.tw"
//! port = 465
//! timeout = 5
//! tls = "tls"
//!
//! [pop3]
//! host = "msa.ntu.edu.tw"
//! port = 995
//!
//! [batch]
//! settle_secs = 5
//! ```
//!
//! ## Environment Overrides
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `MAILSHOT_USERID` | `account.userid` |
//! | `MAILSHOT_PASSWORD` | `account.password` |
//! | `MAILSHOT_SMTP_HOST` | `smtp.host` |
//! | `MAILSHOT_POP3_HOST` | `pop3.host` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::address::{self, Address};
use crate::error::MailError;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mailshot.toml";

fn default_timeout() -> u64 {
    5
}

fn default_settle() -> u64 {
    5
}

/// Login for both the submission and the retrieval server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub userid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(userid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            userid: userid.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("userid", &self.userid)
            .field("password", &"********")
            .finish()
    }
}

/// The `[account]` table.
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub userid: String,
    #[serde(default)]
    pub password: String,
    /// Sender display name, also available to templates as `$sender`
    pub name: String,
    /// Domain appended to bare local-parts (recipients, cc, bcc, and the
    /// account's own address).
    #[serde(default)]
    pub domain: Option<String>,
}

impl Account {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.userid, &self.password)
    }

    /// The operator's own mailbox, with the display name attached.
    pub fn sender_address(&self) -> Address {
        let email = address::complete(&self.userid, self.domain.as_deref());
        Address::with_name(&self.name, email)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("userid", &self.userid)
            .field("password", &"********")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .finish()
    }
}

/// Transport security for a server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// No TLS (dangerous, only for localhost/testing)
    None,
    /// Connect in plain text, upgrade when the server offers STARTTLS/STLS
    #[serde(rename = "starttls")]
    StartTls,
    /// Implicit TLS from the first byte (SMTPS 465, POP3S 995)
    #[default]
    Tls,
}

/// Host, port, and timeout for one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Network timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub tls: TlsMode,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: default_timeout(),
            tls: TlsMode::default(),
        }
    }

    /// Set TLS mode.
    pub fn tls(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    /// Set the network timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// `host:port`, as used in log lines and socket addresses.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The optional `[batch]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Seconds to wait for bounce notifications before checking the mailbox
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle(),
        }
    }
}

impl BatchConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// Complete mailer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailerConfig {
    pub account: Account,
    pub smtp: Endpoint,
    pub pop3: Endpoint,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl MailerConfig {
    /// Parse and validate a TOML document. No environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, MailError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file at `path`, then apply `MAILSHOT_*` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MailError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| {
            MailError::Configuration(format!("{}: {}", path.display(), e))
        })?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded mailer config");
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// [`MailerConfig::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(userid) = lookup("MAILSHOT_USERID") {
            self.account.userid = userid;
        }
        if let Some(password) = lookup("MAILSHOT_PASSWORD") {
            self.account.password = password;
        }
        if let Some(host) = lookup("MAILSHOT_SMTP_HOST") {
            self.smtp.host = host;
        }
        if let Some(host) = lookup("MAILSHOT_POP3_HOST") {
            self.pop3.host = host;
        }
    }

    /// Check required values, reporting the first problem found.
    pub fn validate(&self) -> Result<(), MailError> {
        if self.account.userid.trim().is_empty() {
            return Err(MailError::Configuration("account.userid is empty".into()));
        }
        if self.account.name.trim().is_empty() {
            return Err(MailError::Configuration("account.name is empty".into()));
        }
        for (section, endpoint) in [("smtp", &self.smtp), ("pop3", &self.pop3)] {
            if endpoint.host.trim().is_empty() {
                return Err(MailError::Configuration(format!("{}.host is empty", section)));
            }
            if endpoint.port == 0 {
                return Err(MailError::Configuration(format!("{}.port must be non-zero", section)));
            }
        }
        let sender = self.account.sender_address();
        if Address::parse(&sender.email).is_err() {
            return Err(MailError::Configuration(format!(
                "account address '{}' is not valid; set account.domain or use a full address as userid",
                sender.email
            )));
        }
        Ok(())
    }

    /// Render the config as TOML with the password masked.
    pub fn masked(&self) -> Result<String, MailError> {
        let mut shown = self.clone();
        if !shown.account.password.is_empty() {
            shown.account.password = "********".into();
        }
        toml::to_string_pretty(&shown).map_err(|e| MailError::Configuration(e.to_string()))
    }
}
