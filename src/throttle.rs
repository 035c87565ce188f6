//! Count-driven send throttling.
//!
//! Submission providers cap how fast one connection may push mail. The
//! schedule here is fixed and keyed only on the number of messages attempted
//! so far; it does not react to failures.
//!
//! | Every n-th send | Pause |
//! |-----------------|-------|
//! | 10 | 10 s |
//! | 130 | +20 s |
//! | 260 | +20 s |
//!
//! Rules are independent, so at n = 260 all three fire (50 s total).
//!
//! The policy is a pure function. Sleeping goes through [`Sleeper`] so the
//! batch driver can be tested without real waits.

use async_trait::async_trait;
use std::time::Duration;

/// Pause `pause` after every `every`-th attempted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRule {
    pub every: usize,
    pub pause: Duration,
}

impl ThrottleRule {
    pub const fn new(every: usize, pause: Duration) -> Self {
        Self { every, pause }
    }

    /// Whether this rule fires right after the `count`-th send (1-indexed).
    pub fn fires_at(&self, count: usize) -> bool {
        self.every > 0 && count > 0 && count % self.every == 0
    }
}

/// The schedule observed to keep typical campus/ISP relays from throttling
/// or blacklisting a sender mid-batch.
pub const DEFAULT_RULES: [ThrottleRule; 3] = [
    ThrottleRule::new(10, Duration::from_secs(10)),
    ThrottleRule::new(130, Duration::from_secs(20)),
    ThrottleRule::new(260, Duration::from_secs(20)),
];

/// A set of throttle rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throttle {
    rules: Vec<ThrottleRule>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }
}

impl Throttle {
    /// A throttle with custom rules.
    pub fn new(rules: Vec<ThrottleRule>) -> Self {
        Self { rules }
    }

    /// A throttle that never pauses.
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    /// The individual pauses due after the `count`-th send, in rule order.
    pub fn pauses(&self, count: usize) -> Vec<Duration> {
        self.rules
            .iter()
            .filter(|rule| rule.fires_at(count))
            .map(|rule| rule.pause)
            .collect()
    }

    /// Total pause due after the `count`-th send. Zero means carry on.
    ///
    /// ```
    /// use std::time::Duration;
    /// use mailshot::Throttle;
    ///
    /// let throttle = Throttle::default();
    /// assert_eq!(throttle.pause_duration(9), Duration::ZERO);
    /// assert_eq!(throttle.pause_duration(10), Duration::from_secs(10));
    /// assert_eq!(throttle.pause_duration(130), Duration::from_secs(30));
    /// assert_eq!(throttle.pause_duration(260), Duration::from_secs(50));
    /// ```
    pub fn pause_duration(&self, count: usize) -> Duration {
        self.pauses(count).into_iter().sum()
    }
}

/// Total pause due after the `count`-th send under [`DEFAULT_RULES`].
pub fn pause_duration(count: usize) -> Duration {
    DEFAULT_RULES
        .iter()
        .filter(|rule| rule.fires_at(count))
        .map(|rule| rule.pause)
        .sum()
}

/// Something that can wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
