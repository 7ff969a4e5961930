//! Reconnect backoff policy

use crate::SchedulerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with a cap and a bounded number of attempts.
///
/// Delays double from `base_ms` (1s, 2s, 4s, ...) up to `max_ms`. After
/// `max_attempts` delays have been handed out, [`BackoffPolicy::next_delay`]
/// returns `None` and the caller should give up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// First delay (milliseconds)
    pub base_ms: u64,
    /// Upper bound for any delay (milliseconds)
    pub max_ms: u64,
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
    #[serde(skip)]
    attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 15_000,
            max_attempts: 5,
            attempts: 0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_ms,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.base_ms == 0 {
            return Err(SchedulerError::InvalidBackoff("base delay is zero".to_string()));
        }
        if self.max_ms < self.base_ms {
            return Err(SchedulerError::InvalidBackoff(format!(
                "max delay {}ms below base delay {}ms",
                self.max_ms, self.base_ms
            )));
        }
        Ok(())
    }

    /// Delay before attempt number `attempt` (zero based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let delay = self.base_ms.saturating_mul(factor).min(self.max_ms);
        Duration::from_millis(delay)
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Attempts handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget past attempts (after a successful open)
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
