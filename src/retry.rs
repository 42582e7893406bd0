//! Reconnection policy for ICE negotiation
//!
//! An explicit policy object rather than ad-hoc timer chains, so the retry
//! schedule is testable without real clocks.

use std::time::Duration;

/// Retry schedule applied when the peer connection degrades.
///
/// On `disconnected` the controller waits [`disconnect_grace`] before
/// escalating to failure; on `failed` the caller side re-negotiates up to
/// [`max_attempts`] times with exponential backoff before giving up.
///
/// [`disconnect_grace`]: RetryPolicy::disconnect_grace
/// [`max_attempts`]: RetryPolicy::max_attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-negotiation attempts before reporting terminal failure
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
    /// Upper bound on the per-attempt delay
    pub max_delay: Duration,
    /// Grace window after `disconnected` before treating it as `failed`
    pub disconnect_grace: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            disconnect_grace: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry `attempt` (0-based), capped at
    /// [`max_delay`](Self::max_delay)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `attempts` retries have exhausted the budget
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
