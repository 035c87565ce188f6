//! Letter attachments: loading files once and sharing them across every
//! message of a batch.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MailError;

/// A file attached to every message of a letter.
///
/// ```
/// use mailshot::Attachment;
///
/// let attachment = Attachment::from_bytes("agenda.pdf", b"%PDF".to_vec());
/// assert_eq!(attachment.content_type, "application/pdf");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Filename shown to the recipient
    pub filename: String,
    /// MIME content type (e.g., "application/pdf", "image/png")
    pub content_type: String,
    /// Raw attachment data
    pub data: Vec<u8>,
}

impl Attachment {
    /// Create a new attachment from raw bytes.
    ///
    /// Content type is guessed from the filename extension.
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();

        Self {
            filename,
            content_type,
            data,
        }
    }

    /// Read an attachment from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();

        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MailError::AttachmentFileNotFound(path.display().to_string())
            } else {
                MailError::AttachmentReadError(format!("{}: {}", path.display(), e))
            }
        })?;

        Ok(Self::from_bytes(filename, data))
    }

    /// Set the content type explicitly.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Get the size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Load every regular file in `dir`, skipping dot-files (`.DS_Store` and
/// friends). Files are returned sorted by name. A missing directory means no
/// attachments.
pub fn discover(dir: impl AsRef<Path>) -> Result<Vec<Attachment>, MailError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .map_err(|e| MailError::AttachmentError(format!("{}: {}", dir.display(), e)))?
    {
        let entry = entry.map_err(|e| MailError::AttachmentError(e.to_string()))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let attachments = paths
        .iter()
        .map(Attachment::from_path)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        dir = %dir.display(),
        count = attachments.len(),
        "Loaded attachments"
    );

    Ok(attachments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes() {
        let attachment = Attachment::from_bytes("test.txt", b"Hello".to_vec());
        assert_eq!(attachment.filename, "test.txt");
        assert_eq!(attachment.content_type, "text/plain");
        assert_eq!(attachment.size(), 5);
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(Attachment::from_bytes("image.png", vec![]).content_type, "image/png");
        assert_eq!(
            Attachment::from_bytes("file.unknown_ext_12345", vec![]).content_type,
            "application/octet-stream"
        );
    }

    #[test]
    fn test_from_path_missing() {
        let err = Attachment::from_path("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, MailError::AttachmentFileNotFound(_)));
    }

    #[test]
    fn test_discover_skips_dot_files_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let found = discover(dir.path()).unwrap();
        let names: Vec<_> = found.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.pdf"]);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        assert!(discover("/definitely/not/a/dir").unwrap().is_empty());
    }
}
