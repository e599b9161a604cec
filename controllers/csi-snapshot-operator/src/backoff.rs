//! # Exponential Backoff
//!
//! Per-key exponential failure backoff used by the work queue's rate-limited
//! requeue. Each consecutive failure of a key doubles its delay, starting at
//! `base` and capped at `max`. Forgetting a key resets its failure count.
//!
//! Default sequence: 5ms, 10ms, 20ms, 40ms, ... capped at 1000s.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default first retry delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default ceiling on the retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ExponentialBackoff {
    /// Create a backoff with the given first delay and ceiling
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay for the given number of previous failures (0-indexed)
    ///
    /// `base * 2^failures`, capped at `max`. Saturates instead of overflowing
    /// for large failure counts.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Tracks consecutive failures per key and hands out backoff delays.
#[derive(Debug)]
pub struct ItemBackoff<K> {
    backoff: ExponentialBackoff,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ItemBackoff<K> {
    /// Create a tracker using `backoff` for delay calculation
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.backoff.delay_for(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Number of failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the failure count for `key`
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }
}

impl<K: Eq + Hash + Clone> Default for ItemBackoff<K> {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}
