//! Reconnect backoff policy.

use std::time::Duration;

/// Exponential backoff schedule for instance reconnects.
///
/// Delay before attempt `n` (zero-based) is `min(base × 2^n, cap)`. The
/// schedule is deterministic; discovery re-observation, not jitter, is what
/// spreads instances out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// First delay.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Attempts before the connection gives up entirely.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u128 << attempt.min(32);
        let millis = self.base_delay.as_millis().saturating_mul(factor);
        let capped = millis.min(self.max_delay.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Whether `attempts` reconnects have exhausted the policy.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
