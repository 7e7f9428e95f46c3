//! # Exponential Backoff
//!
//! Per-object exponential failure backoff for reconcile retries.
//!
//! Each failed item waits `base * 2^failures`, capped at `max`. A success
//! forgets the item so its next failure starts over at `base`.
//! Defaults: 5ms base, 60s cap.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default delay after the first failure
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
/// Default upper bound for a single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff calculator
#[derive(Debug, Clone, Copy)]
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
    /// Create a new exponential backoff
    ///
    /// # Arguments
    ///
    /// * `base` - Delay for the first failure
    /// * `max` - Cap for every delay
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Calculate the backoff for a given number of previous failures (stateless)
    ///
    /// `error_count` 0 yields `base`, every further failure doubles it,
    /// the result never exceeds `max`.
    #[must_use]
    pub fn calculate_for_error_count(&self, error_count: u32) -> Duration {
        // 2^31 * 5ms is far beyond any sane cap, stop shifting before overflow
        let factor = 1u32.checked_shl(error_count.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Failure counts per object
#[derive(Debug)]
pub struct ItemBackoff<K> {
    policy: ExponentialBackoff,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ItemBackoff<K> {
    /// Create an empty tracker using `policy`
    pub fn new(policy: ExponentialBackoff) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
        }
    }

    /// Delay before `key` may be retried; records one more failure
    pub fn when(&mut self, key: &K) -> Duration {
        let count = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.policy.calculate_for_error_count(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Reset `key` after a success
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    /// Number of failures recorded for `key`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
