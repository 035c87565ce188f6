//! Letter directories: one message template, its settings, its recipients.
//!
//! ```text
//! letter/
//! ├── attachments/     optional, dot-files ignored
//! ├── config.toml
//! ├── content.html
//! └── recipients.csv
//! ```
//!
//! `config.toml`:
//!
//! ```toml
//! subject = "Invitation to the 2024 alumni dinner"
//! from = "NTUEE Student Association"   # display name, defaults to account.name
//! recipient_title = "教授"
//! last_name_only = true
//! cc = ["b09901002"]
//! bcc = []
//! bcc_to_sender = true
//! ```

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::address::{self, Address};
use crate::attachment::{self, Attachment};
use crate::config::Account;
use crate::email::Email;
use crate::error::MailError;
use crate::recipient::{self, Recipient, RecipientList};
use crate::template::Template;

pub const CONFIG_FILE: &str = "config.toml";
pub const CONTENT_FILE: &str = "content.html";
pub const RECIPIENTS_FILE: &str = "recipients.csv";
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Template field that always holds the account's display name.
pub const SENDER_FIELD: &str = "sender";

/// `config.toml` of a letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LetterConfig {
    pub subject: String,
    /// Display name on the `From` header
    #[serde(default)]
    pub from: Option<String>,
    /// Appended to each recipient's name before it reaches the template
    #[serde(default)]
    pub recipient_title: Option<String>,
    /// With `recipient_title`, keep only the first character of the name
    /// (the family name, for Chinese names)
    #[serde(default)]
    pub last_name_only: bool,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub bcc_to_sender: bool,
}

impl LetterConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, MailError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MailError::InvalidLetter(vec![format!("{}: {}", CONFIG_FILE, e)]))?;
        if config.subject.trim().is_empty() {
            return Err(MailError::InvalidLetter(vec![format!(
                "{}: subject is empty",
                CONFIG_FILE
            )]));
        }
        Ok(config)
    }

    /// The name as it appears in the body.
    pub fn salutation(&self, name: &str) -> String {
        match &self.recipient_title {
            Some(title) if self.last_name_only => {
                let family: String = name.chars().take(1).collect();
                format!("{}{}", family, title)
            }
            Some(title) => format!("{}{}", name, title),
            None => name.to_string(),
        }
    }
}

struct Parts {
    config: LetterConfig,
    template: Template,
    recipients: RecipientList,
    attachments: Vec<Attachment>,
    cc: Vec<Address>,
    bcc: Vec<Address>,
}

fn collect<T>(result: Result<T, MailError>, issues: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(MailError::InvalidLetter(found)) => {
            issues.extend(found);
            None
        }
        Err(e) => {
            issues.push(e.to_string());
            None
        }
    }
}

fn read_file(dir: &Path, name: &str) -> Result<String, MailError> {
    let path = dir.join(name);
    if !path.is_file() {
        return Err(MailError::InvalidLetter(vec![format!(
            "{} not found",
            path.display()
        )]));
    }
    std::fs::read_to_string(&path)
        .map_err(|e| MailError::InvalidLetter(vec![format!("cannot read {}: {}", path.display(), e)]))
}

fn complete_list(
    values: &[String],
    field: &str,
    domain: Option<&str>,
) -> Result<Vec<Address>, MailError> {
    let mut issues = Vec::new();
    let mut addresses = Vec::new();
    for value in values {
        let email = address::complete(value, domain);
        match Address::parse(&email) {
            Ok(addr) => addresses.push(addr),
            Err(_) => issues.push(format!("{}: invalid {} address '{}'", CONFIG_FILE, field, value)),
        }
    }
    if issues.is_empty() {
        Ok(addresses)
    } else {
        Err(MailError::InvalidLetter(issues))
    }
}

fn read_parts(dir: &Path, domain: Option<&str>) -> Result<Parts, Vec<String>> {
    let mut issues = Vec::new();

    if !dir.is_dir() {
        return Err(vec![format!("{} is not a directory", dir.display())]);
    }
    let attachments_dir = dir.join(ATTACHMENTS_DIR);
    if attachments_dir.exists() && !attachments_dir.is_dir() {
        issues.push(format!("{} should be a directory", attachments_dir.display()));
    }

    let config = collect(
        read_file(dir, CONFIG_FILE).and_then(|c| LetterConfig::from_toml_str(&c)),
        &mut issues,
    );
    let template = collect(
        read_file(dir, CONTENT_FILE).and_then(|c| Template::parse(&c)),
        &mut issues,
    );
    let scan = collect(
        recipient::scan_file(dir.join(RECIPIENTS_FILE), domain),
        &mut issues,
    );
    let columns = scan.as_ref().map(|scan| scan.list.columns.clone());
    let recipients = scan.and_then(|scan| collect(scan.into_result(), &mut issues));
    let attachments = collect(attachment::discover(&attachments_dir), &mut issues);

    let (cc, bcc) = match &config {
        Some(config) => (
            collect(complete_list(&config.cc, "cc", domain), &mut issues),
            collect(complete_list(&config.bcc, "bcc", domain), &mut issues),
        ),
        None => (None, None),
    };

    // Checked against the header even when rows are bad.
    if let (Some(template), Some(columns)) = (&template, &columns) {
        let available = columns
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(SENDER_FIELD));
        for field in template.missing_fields(available) {
            issues.push(format!(
                "template field '{}' in {} is not a column of {}",
                field, CONTENT_FILE, RECIPIENTS_FILE
            ));
        }
    }

    match (config, template, recipients, attachments, cc, bcc) {
        (Some(config), Some(template), Some(recipients), Some(attachments), Some(cc), Some(bcc))
            if issues.is_empty() =>
        {
            Ok(Parts {
                config,
                template,
                recipients,
                attachments,
                cc,
                bcc,
            })
        }
        _ => Err(issues),
    }
}

/// A loaded, validated letter ready to be turned into messages.
#[derive(Debug, Clone)]
pub struct Letter {
    dir: PathBuf,
    config: LetterConfig,
    template: Template,
    recipients: RecipientList,
    attachments: Vec<Attachment>,
    sender: Address,
    sender_name: String,
    cc: Vec<Address>,
    bcc: Vec<Address>,
}

impl Letter {
    /// Load the letter at `dir` for `account`. Fails with every issue found.
    pub fn load(dir: impl AsRef<Path>, account: &Account) -> Result<Self, MailError> {
        let dir = dir.as_ref();
        let parts = read_parts(dir, account.domain.as_deref()).map_err(MailError::InvalidLetter)?;

        let sender_email = account.sender_address().email;
        let display = parts.config.from.clone().unwrap_or_else(|| account.name.clone());

        let mut bcc = parts.bcc;
        if parts.config.bcc_to_sender {
            bcc.push(Address::new(&sender_email));
        }

        tracing::info!(
            letter = %dir.display(),
            recipients = parts.recipients.len(),
            attachments = parts.attachments.len(),
            "Loaded letter"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            config: parts.config,
            template: parts.template,
            recipients: parts.recipients,
            attachments: parts.attachments,
            sender: Address::with_name(display, sender_email),
            sender_name: account.name.clone(),
            cc: parts.cc,
            bcc,
        })
    }

    /// Validate the letter at `dir` without building anything. Empty means valid.
    pub fn check(dir: impl AsRef<Path>, default_domain: Option<&str>) -> Vec<String> {
        match read_parts(dir.as_ref(), default_domain) {
            Ok(_) => Vec::new(),
            Err(issues) => issues,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &LetterConfig {
        &self.config
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients.recipients
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Recipient addresses in send order.
    pub fn addresses(&self) -> Vec<&str> {
        self.recipients.emails()
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Build the message for one recipient.
    pub fn build_email(&self, recipient: &Recipient) -> Result<Email, MailError> {
        let mut values: BTreeMap<String, String> = recipient.fields.clone();
        values.insert("name".into(), self.config.salutation(&recipient.name));
        values.insert(SENDER_FIELD.into(), self.sender_name.clone());

        let body = self.template.render(&values)?;

        let mut email = Email::new()
            .date(Local::now())
            .subject(&self.config.subject)
            .to(recipient.email.as_str())
            .from(self.sender.clone())
            .put_cc(self.cc.clone())
            .put_bcc(self.bcc.clone())
            .html_body(body);
        for attachment in &self.attachments {
            email = email.attachment(attachment.clone());
        }
        Ok(email)
    }

    /// Build every message, in recipient order.
    pub fn emails(&self) -> Result<Vec<Email>, MailError> {
        self.recipients().iter().map(|r| self.build_email(r)).collect()
    }
}

const SCAFFOLD_CONFIG: &str = r#"subject = "Subject of the letter"
# from = "Display name on the From header"
# recipient_title = " Professor"
# last_name_only = false
cc = []
bcc = []
bcc_to_sender = false
"#;

const SCAFFOLD_CONTENT: &str = r#"<p>Dear $name,</p>

<p>Write the letter here. Every column of recipients.csv is available as
<code>$$column</code>; <code>$$sender</code> is your account name.</p>

<p>Best regards,<br>$sender</p>
"#;

const SCAFFOLD_RECIPIENTS: &str = "name,email\nJane Doe,jane@example.org\n";

/// Create a new letter directory at `dir` with starter files.
pub fn create(dir: impl AsRef<Path>) -> Result<(), MailError> {
    let dir = dir.as_ref();
    if dir.exists() {
        return Err(MailError::Io(format!("{} already exists", dir.display())));
    }

    std::fs::create_dir_all(dir.join(ATTACHMENTS_DIR))?;
    std::fs::write(dir.join(CONFIG_FILE), SCAFFOLD_CONFIG)?;
    std::fs::write(dir.join(CONTENT_FILE), SCAFFOLD_CONTENT)?;
    std::fs::write(dir.join(RECIPIENTS_FILE), SCAFFOLD_RECIPIENTS)?;

    tracing::info!(letter = %dir.display(), "Created letter");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra: &str) -> LetterConfig {
        LetterConfig::from_toml_str(&format!("subject = \"Hi\"\n{}", extra)).unwrap()
    }

    #[test]
    fn test_salutation() {
        assert_eq!(config("").salutation("王小明"), "王小明");
        assert_eq!(config("recipient_title = \"教授\"").salutation("王小明"), "王小明教授");
        assert_eq!(
            config("recipient_title = \"教授\"\nlast_name_only = true").salutation("王小明"),
            "王教授"
        );
    }

    #[test]
    fn test_subject_required() {
        assert!(LetterConfig::from_toml_str("from = \"x\"").is_err());
        assert!(LetterConfig::from_toml_str("subject = \"  \"").is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = LetterConfig::from_toml_str("subject = \"x\"\nbccToSender = true").unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_scaffold_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let letter = dir.path().join("invite");
        create(&letter).unwrap();
        assert!(Letter::check(&letter, None).is_empty());
        assert!(create(&letter).is_err());
    }
}
