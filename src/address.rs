//! Email address type with optional display name, plus the normalization
//! applied to every recipient before it enters a batch.

use crate::error::MailError;
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An email address with an optional display name.
///
/// # Examples
///
/// ```
/// use mailshot::Address;
///
/// let addr: Address = "user@example.com".into();
/// assert_eq!(addr.email, "user@example.com");
/// assert_eq!(addr.name, None);
///
/// let addr: Address = ("Alice", "alice@example.com").into();
/// assert_eq!(addr.name, Some("Alice".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Optional display name (e.g., "Alice Smith")
    pub name: Option<String>,
    /// Email address (e.g., "alice@example.com")
    pub email: String,
}

impl Address {
    /// An address without a display name. Nothing is validated here; see
    /// [`Address::parse`].
    pub fn new(email: impl Into<String>) -> Self {
        let email = email.into();
        warn_if_suspicious(&email);
        Self { name: None, email }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();
        warn_if_suspicious(&email);
        Self {
            name: Some(name.into()),
            email,
        }
    }

    /// Validate `email` (RFC 5321/5322) and wrap it.
    ///
    /// ```
    /// use mailshot::Address;
    ///
    /// assert!(Address::parse("b09901001@ntu.edu.tw").is_ok());
    /// assert!(Address::parse("b09901001").is_err());
    /// ```
    pub fn parse(email: &str) -> Result<Self, MailError> {
        if !EmailAddress::is_valid(email) {
            return Err(MailError::InvalidAddress(format!(
                "'{}' is not a valid email address",
                email
            )));
        }
        Ok(Self {
            name: None,
            email: email.to_string(),
        })
    }

    /// The address with its domain in Punycode, as submitted on the wire.
    ///
    /// ```
    /// use mailshot::Address;
    ///
    /// let addr = Address::new("user@例え.jp");
    /// assert_eq!(addr.to_ascii().unwrap(), "user@xn--r8jz45g.jp");
    /// ```
    pub fn to_ascii(&self) -> Result<String, MailError> {
        let (local, domain) = self.email.rsplit_once('@').ok_or_else(|| {
            MailError::InvalidAddress(format!("'{}' has no domain", self.email))
        })?;
        let domain = idna::domain_to_ascii(domain)
            .map_err(|e| MailError::InvalidAddress(format!("bad domain '{}': {:?}", domain, e)))?;
        Ok(format!("{}@{}", local, domain))
    }

    /// `Name <email>`, or the bare email.
    pub fn formatted(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.email),
            _ => self.email.clone(),
        }
    }

    /// The normalized form of this address, as used for bounce correlation.
    pub fn normalized(&self) -> String {
        normalize(&self.email)
    }
}

fn warn_if_suspicious(email: &str) {
    if !email.contains('@') {
        tracing::warn!(email = %email, "Address has no '@'; use Address::parse() to validate");
    }
}

/// Trim and lower-case an address. Two addresses refer to the same mailbox
/// for reconciliation purposes iff their normalized forms are equal.
pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize a recipient address, completing a bare local-part with
/// `default_domain` when one is configured.
///
/// ```
/// use mailshot::address::complete;
///
/// assert_eq!(complete(" B09901001 ", Some("ntu.edu.tw")), "b09901001@ntu.edu.tw");
/// assert_eq!(complete("Prof@Example.org", Some("ntu.edu.tw")), "prof@example.org");
/// assert_eq!(complete("b09901001", None), "b09901001");
/// ```
pub fn complete(email: &str, default_domain: Option<&str>) -> String {
    let email = normalize(email);
    match default_domain {
        Some(domain) if !email.is_empty() && !email.contains('@') => {
            format!("{}@{}", email, domain.trim().to_lowercase())
        }
        _ => email,
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Self::new(email)
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Self::new(email)
    }
}

// (name, email)
impl From<(&str, &str)> for Address {
    fn from((name, email): (&str, &str)) -> Self {
        Self::with_name(name, email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted() {
        assert_eq!(Address::new("prof@example.edu").formatted(), "prof@example.edu");
        assert_eq!(
            Address::with_name("Jane Doe", "jane@example.org").formatted(),
            "Jane Doe <jane@example.org>"
        );
        assert_eq!(Address::with_name("", "jane@example.org").formatted(), "jane@example.org");
    }

    #[test]
    fn test_parse_rejects_incomplete_addresses() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("carol@").is_err());
        assert!(Address::parse("user@@example.com").is_err());
        assert!(Address::parse("user @example.com").is_err());
    }

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(normalize("  Bad.Addr@School.EDU\r\n"), "bad.addr@school.edu");
        assert_eq!(Address::new("X@Example.com").normalized(), "x@example.com");
    }

    #[test]
    fn test_complete_keeps_full_addresses() {
        assert_eq!(complete("a@b.org", Some("ntu.edu.tw")), "a@b.org");
        assert_eq!(complete("", Some("ntu.edu.tw")), "");
        assert_eq!(complete("r11", Some(" NTU.edu.tw ")), "r11@ntu.edu.tw");
    }

    #[test]
    fn test_to_ascii_without_domain() {
        let err = Address::new("b09901001").to_ascii().unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress(msg) if msg.contains("no domain")));
    }
}
