//! Recipient list loading (`recipients.csv`).
//!
//! The first row names the columns. `name` and `email` are required; any
//! other column becomes a template field. Every problem in the file is
//! collected and reported together.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use crate::address::{self, Address};
use crate::error::MailError;

/// One row of the recipient list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    /// Normalized, domain-completed, validated
    pub email: String,
    /// Every column of the row (including `name` and `email`), trimmed
    pub fields: BTreeMap<String, String>,
}

impl Recipient {
    pub fn address(&self) -> Address {
        Address::with_name(&self.name, &self.email)
    }
}

/// A parsed recipient list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientList {
    /// Column names from the header row, trimmed
    pub columns: Vec<String>,
    pub recipients: Vec<Recipient>,
}

impl RecipientList {
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Email addresses in file order.
    pub fn emails(&self) -> Vec<&str> {
        self.recipients.iter().map(|r| r.email.as_str()).collect()
    }
}

/// Everything read from a recipient list: the header row, the good rows,
/// and a problem description for each bad one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    pub list: RecipientList,
    pub issues: Vec<String>,
}

impl Scan {
    /// The list, if nothing was wrong with it.
    pub fn into_result(self) -> Result<RecipientList, MailError> {
        if self.issues.is_empty() {
            Ok(self.list)
        } else {
            Err(MailError::InvalidLetter(self.issues))
        }
    }
}

/// Read the list at `path`, keeping the columns even when rows are bad.
///
/// Issues are prefixed with the path.
pub fn scan_file(path: impl AsRef<Path>, default_domain: Option<&str>) -> Result<Scan, MailError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        MailError::InvalidLetter(vec![format!("cannot read {}: {}", path.display(), e)])
    })?;
    let mut scan = scan_recipients(file, default_domain)?;
    for issue in &mut scan.issues {
        *issue = format!("{}: {}", path.display(), issue);
    }
    Ok(scan)
}

/// Load and validate the list at `path`.
pub fn load_recipients(
    path: impl AsRef<Path>,
    default_domain: Option<&str>,
) -> Result<RecipientList, MailError> {
    scan_file(path, default_domain)?.into_result()
}

/// Parse and validate a recipient list from any reader.
pub fn read_recipients<R: io::Read>(
    reader: R,
    default_domain: Option<&str>,
) -> Result<RecipientList, MailError> {
    scan_recipients(reader, default_domain)?.into_result()
}

/// Parse a recipient list, collecting problems instead of stopping at them.
///
/// Only an unreadable header row is an error.
pub fn scan_recipients<R: io::Read>(
    reader: R,
    default_domain: Option<&str>,
) -> Result<Scan, MailError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();

    let mut issues = Vec::new();
    for required in ["name", "email"] {
        if !columns.iter().any(|c| c == required) {
            issues.push(format!("missing '{}' column", required));
        }
    }
    if !issues.is_empty() {
        return Ok(Scan {
            list: RecipientList {
                columns,
                recipients: Vec::new(),
            },
            issues,
        });
    }

    let mut recipients = Vec::new();
    for (index, record) in reader.records().enumerate() {
        // header is row 1
        let row = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                issues.push(format!("row {}: {}", row, e));
                continue;
            }
        };

        if record.len() > columns.len() {
            issues.push(format!("too many fields at row {}", row));
            continue;
        }

        let fields: BTreeMap<String, String> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| (column.clone(), record.get(i).unwrap_or_default().to_string()))
            .collect();

        let mut row_ok = true;
        for required in ["name", "email"] {
            if fields.get(required).map_or(true, |v| v.is_empty()) {
                issues.push(format!("empty {} at row {}", required, row));
                row_ok = false;
            }
        }
        if !row_ok {
            continue;
        }

        let name = fields.get("name").cloned().unwrap_or_default();
        let raw_email = fields.get("email").map(String::as_str).unwrap_or_default();
        let email = address::complete(raw_email, default_domain);
        if Address::parse(&email).is_err() {
            issues.push(format!("invalid email {} at row {}", email, row));
            continue;
        }

        let mut fields = fields;
        fields.insert("email".to_string(), email.clone());
        recipients.push(Recipient { name, email, fields });
    }

    if !issues.is_empty() {
        tracing::debug!(count = issues.len(), "Recipient list has problems");
    }

    Ok(Scan {
        list: RecipientList {
            columns,
            recipients,
        },
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(csv: &str) -> Result<RecipientList, MailError> {
        read_recipients(csv.as_bytes(), Some("ntu.edu.tw"))
    }

    fn issues(csv: &str) -> Vec<String> {
        match read(csv).unwrap_err() {
            MailError::InvalidLetter(issues) => issues,
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_reads_rows_and_extra_columns() {
        let list = read("name, email, title\n Wu , B09901001 , Dr.\nLin,lin@example.org,Prof.\n").unwrap();
        assert_eq!(list.columns, vec!["name", "email", "title"]);
        assert_eq!(list.emails(), vec!["b09901001@ntu.edu.tw", "lin@example.org"]);
        assert_eq!(list.recipients[0].name, "Wu");
        assert_eq!(list.recipients[0].fields["title"], "Dr.");
        assert_eq!(list.recipients[0].fields["email"], "b09901001@ntu.edu.tw");
    }

    #[test]
    fn test_missing_columns() {
        let found = issues("name,address\nWu,x@example.org\n");
        assert_eq!(found, vec!["missing 'email' column"]);
    }

    #[test]
    fn test_reports_every_problem() {
        let found = issues("name,email\n,a@example.org\nWu,\nLin,b@example.org,extra\nChen,not an email\n");
        assert_eq!(found.len(), 4);
        assert!(found[0].contains("empty name at row 2"));
        assert!(found[1].contains("empty email at row 3"));
        assert!(found[2].contains("too many fields at row 4"));
        assert!(found[3].contains("invalid email"));
    }

    #[test]
    fn test_scan_keeps_columns_and_good_rows() {
        let scan = scan_recipients(
            "name,email,room\nWu,wu@example.org,B201\n,nobody@example.org,C14\n".as_bytes(),
            None,
        )
        .unwrap();
        assert_eq!(scan.list.columns, vec!["name", "email", "room"]);
        assert_eq!(scan.list.emails(), vec!["wu@example.org"]);
        assert_eq!(scan.issues, vec!["empty name at row 3"]);
        assert!(scan.into_result().is_err());
    }

    #[test]
    fn test_short_row_is_empty_email() {
        let found = issues("name,email\nWu\n");
        assert_eq!(found, vec!["empty email at row 2"]);
    }

    #[test]
    fn test_empty_list_is_valid() {
        assert!(read("name,email\n").unwrap().is_empty());
    }
}
