//! In-memory stores behind the local session and mailbox doubles.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::email::Email;

/// A stored email with metadata.
#[derive(Debug, Clone)]
pub struct StoredEmail {
    /// Unique identifier for this email.
    pub id: String,
    /// The email content.
    pub email: Email,
    /// When the email was "sent" (stored).
    pub sent_at: DateTime<Utc>,
}

/// Trait for email storage backends.
pub trait Storage: Send + Sync {
    /// Store an email and return its ID.
    fn push(&self, email: Email) -> String;

    /// All stored emails, in the order they were sent.
    fn all(&self) -> Vec<StoredEmail>;

    /// Get the count of stored emails.
    fn count(&self) -> usize;

    /// Remove and return all stored emails.
    fn flush(&self) -> Vec<StoredEmail>;
}

/// Thread-safe in-memory storage for sent emails.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    emails: RwLock<Vec<StoredEmail>>,
}

impl MemoryStorage {
    /// Create a new empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently stored email.
    pub fn last(&self) -> Option<StoredEmail> {
        self.emails.read().last().cloned()
    }
}

impl Storage for MemoryStorage {
    fn push(&self, email: Email) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.emails.write().push(StoredEmail {
            id: id.clone(),
            email,
            sent_at: Utc::now(),
        });
        id
    }

    fn all(&self) -> Vec<StoredEmail> {
        self.emails.read().clone()
    }

    fn count(&self) -> usize {
        self.emails.read().len()
    }

    fn flush(&self) -> Vec<StoredEmail> {
        std::mem::take(&mut *self.emails.write())
    }
}

/// Raw messages of a simulated mailbox, oldest first.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: RwLock<Vec<Vec<u8>>>,
}

impl MessageStore {
    /// Append a message as the newest.
    pub fn append(&self, raw: impl Into<Vec<u8>>) {
        self.messages.write().push(raw.into());
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Message `index`, 1-indexed as in POP3.
    pub fn get(&self, index: usize) -> Option<Vec<u8>> {
        index
            .checked_sub(1)
            .and_then(|i| self.messages.read().get(i).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_send_order() {
        let storage = MemoryStorage::new();
        storage.push(Email::new().subject("one"));
        storage.push(Email::new().subject("two"));

        let subjects: Vec<_> = storage.all().into_iter().map(|s| s.email.subject).collect();
        assert_eq!(subjects, vec!["one", "two"]);
        assert_eq!(storage.last().unwrap().email.subject, "two");
    }

    #[test]
    fn test_flush_empties() {
        let storage = MemoryStorage::new();
        storage.push(Email::new());
        assert_eq!(storage.flush().len(), 1);
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn test_message_store_is_one_indexed() {
        let store = MessageStore::default();
        store.append("first");
        store.append("second");
        assert_eq!(store.get(0), None);
        assert_eq!(store.get(1).unwrap(), b"first");
        assert_eq!(store.get(2).unwrap(), b"second");
        assert_eq!(store.get(3), None);
    }
}
