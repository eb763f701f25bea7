//! Retry and backoff policy for writes the remote store could not take.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Default first backoff step (30 s).
pub const DEFAULT_BASE_DELAY_MS: u64 = 30_000;

/// Default backoff ceiling (5 min).
pub const DEFAULT_MAX_DELAY_MS: u64 = 300_000;

/// How unavailable writes are retried.
///
/// Unavailable writes stay queued. After a flush with failures the periodic
/// trigger waits `min(base * 2^(n-1), max)` where `n` counts consecutive
/// failing flushes. Manual and reconnect flushes ignore the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Drop a write once its retry count reaches this. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: Option<u32>) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    /// Wait after `consecutive_failures` failing flushes.
    pub fn backoff_ms(&self, consecutive_failures: u32) -> u64 {
        if consecutive_failures == 0 {
            return 0;
        }
        let exponent = (consecutive_failures - 1).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }

    /// Earliest time the periodic trigger may flush again.
    pub fn next_attempt_at(&self, now: Timestamp, consecutive_failures: u32) -> Timestamp {
        now.saturating_add(self.backoff_ms(consecutive_failures))
    }

    /// Whether a write with `retry_count` failures should be given up on.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        self.max_attempts.is_some_and(|max| retry_count >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let steps: Vec<u64> = (0..7).map(|n| policy.backoff_ms(n)).collect();
        assert_eq!(
            steps,
            [0, 30_000, 60_000, 120_000, 240_000, 300_000, 300_000]
        );
    }

    #[test]
    fn backoff_does_not_overflow() {
        let policy = RetryPolicy::new(u64::MAX / 2, u64::MAX, None);
        assert_eq!(policy.backoff_ms(u32::MAX), u64::MAX);
        assert_eq!(policy.next_attempt_at(u64::MAX - 1, 3), u64::MAX);
    }

    #[test]
    fn exhausted_only_with_limit() {
        assert!(!RetryPolicy::default().exhausted(1_000));

        let policy = RetryPolicy::new(1, 1, Some(3));
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
