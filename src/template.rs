//! `$field` substitution for letter bodies, on top of `shellexpand`.
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `$name` | value of field `name` |
//! | `${name}` | same, for use right before letters or digits |
//! | `$$` | a literal `$` |
//!
//! Field names are ASCII: a letter or underscore, then letters, digits, or
//! underscores. A placeholder with any other name (`$5`, `${1st}`) is an
//! error.
//!
//! ```
//! use std::collections::BTreeMap;
//! use mailshot::Template;
//!
//! let template = Template::parse("Dear $name, the fee is $$${amount}.").unwrap();
//! let mut values = BTreeMap::new();
//! values.insert("name".to_string(), "Prof. Lin".to_string());
//! values.insert("amount".to_string(), "30".to_string());
//!
//! assert_eq!(template.render(&values).unwrap(), "Dear Prof. Lin, the fee is $30.");
//! ```

use std::collections::BTreeMap;

use crate::error::MailError;

const ESCAPED_DOLLAR: &str = "$$";

/// A parsed body template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    fields: Vec<String>,
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn invalid(name: &str) -> MailError {
    MailError::TemplateError(format!("invalid placeholder '${}'", name))
}

/// Expand every placeholder of `source` through `lookup`, keeping `$$` as `$`.
fn expand<F>(source: &str, mut lookup: F) -> Result<String, MailError>
where
    F: FnMut(&str) -> Result<String, MailError>,
{
    let mut out = String::with_capacity(source.len());
    for (i, piece) in source.split(ESCAPED_DOLLAR).enumerate() {
        if i > 0 {
            out.push('$');
        }
        let expanded = shellexpand::env_with_context(piece, |name: &str| {
            if !is_field_name(name) {
                return Err(invalid(name));
            }
            lookup(name).map(Some)
        })
        .map_err(|e| e.cause)?;
        out.push_str(&expanded);
    }
    Ok(out)
}

impl Template {
    /// Parse `source`, rejecting malformed placeholders.
    pub fn parse(source: &str) -> Result<Self, MailError> {
        let mut fields: Vec<String> = Vec::new();
        expand(source, |name| {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
            Ok(String::new())
        })?;

        Ok(Self {
            source: source.to_string(),
            fields,
        })
    }

    /// Distinct field names in order of first use.
    pub fn fields(&self) -> Vec<&str> {
        self.fields.iter().map(String::as_str).collect()
    }

    /// Fields used by the template that are not in `available`.
    pub fn missing_fields<'a, I>(&self, available: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let available: Vec<&str> = available.into_iter().collect();
        self.fields
            .iter()
            .filter(|f| !available.contains(&f.as_str()))
            .cloned()
            .collect()
    }

    /// Substitute every field. A field without a value is an error.
    pub fn render(&self, values: &BTreeMap<String, String>) -> Result<String, MailError> {
        expand(&self.source, |name| {
            values
                .get(name)
                .cloned()
                .ok_or_else(|| MailError::TemplateError(format!("no value for field '{}'", name)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_plain_text_passes_through() {
        let template = Template::parse("<p>Hello</p>").unwrap();
        assert!(template.fields().is_empty());
        assert_eq!(template.render(&BTreeMap::new()).unwrap(), "<p>Hello</p>");
    }

    #[test]
    fn test_fields_in_first_use_order() {
        let template = Template::parse("$name and ${sender}, again $name").unwrap();
        assert_eq!(template.fields(), vec!["name", "sender"]);
    }

    #[test]
    fn test_braced_field_next_to_identifier_chars() {
        let template = Template::parse("${n}th").unwrap();
        assert_eq!(template.render(&values(&[("n", "4")])).unwrap(), "4th");
    }

    #[test]
    fn test_braced_field_next_to_cjk_text() {
        let template = Template::parse("${name}您好").unwrap();
        assert_eq!(template.render(&values(&[("name", "王教授")])).unwrap(), "王教授您好");
    }

    #[test]
    fn test_unbraced_field_stops_at_non_identifier() {
        let template = Template::parse("Dear $name,").unwrap();
        assert_eq!(template.render(&values(&[("name", "Wu")])).unwrap(), "Dear Wu,");
    }

    #[test]
    fn test_escaped_dollar() {
        let template = Template::parse("$$5 or $$$price").unwrap();
        assert_eq!(template.fields(), vec!["price"]);
        assert_eq!(template.render(&values(&[("price", "7")])).unwrap(), "$5 or $7");
    }

    #[test]
    fn test_missing_value_is_error() {
        let template = Template::parse("Hi $name").unwrap();
        let err = template.render(&BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_missing_fields() {
        let template = Template::parse("$name $title $sender").unwrap();
        assert_eq!(template.missing_fields(["name", "email", "sender"]), vec!["title"]);
    }

    #[test]
    fn test_invalid_placeholders() {
        for source in ["cost: $5", "${1abc}", "${na-me}"] {
            let err = Template::parse(source).unwrap_err();
            assert!(matches!(err, MailError::TemplateError(_)), "{:?}", source);
        }
    }
}
