//! Per-batch delivery bookkeeping.

use serde::{Deserialize, Serialize};

use crate::address::normalize;

/// Outcome of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    Failed(String),
}

/// A message the server refused, kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelivery {
    /// The `To` header of the failed message
    pub to: String,
    pub reason: String,
}

/// Running counters and the attempted-address list for one batch.
///
/// Owned by the batch driver; nothing else writes to it. Counts are never
/// rolled back, so a batch that stops early still reports its progress.
#[derive(Debug, Clone, Default)]
pub struct DeliveryTracker {
    attempted: usize,
    succeeded: usize,
    addresses: Vec<String>,
    failures: Vec<FailedDelivery>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new attempt for the given `To` addresses and return the
    /// updated attempted count (1-indexed).
    pub fn begin<'a, I>(&mut self, to: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.attempted += 1;
        self.addresses.extend(to.into_iter().map(normalize));
        self.attempted
    }

    /// Record the result of the attempt started by the last [`begin`](Self::begin).
    pub fn record(&mut self, to: &str, outcome: &SendOutcome) {
        match outcome {
            SendOutcome::Sent => self.succeeded += 1,
            SendOutcome::Failed(reason) => self.failures.push(FailedDelivery {
                to: to.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Normalized `To` addresses of every attempted message, in send order.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn failures(&self) -> &[FailedDelivery] {
        &self.failures
    }

    /// Whether `email` was among the attempted recipients.
    pub fn was_attempted(&self, email: &str) -> bool {
        let email = normalize(email);
        self.addresses.iter().any(|a| *a == email)
    }
}
