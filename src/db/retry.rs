//! Lock-contention retry policy
//!
//! SQLite's busy timeout absorbs short contention; when it still surfaces
//! SQLITE_BUSY/LOCKED the writer asks a policy whether to try again on a
//! fresh connection and how long to wait first.

use crate::settings::Settings;
use std::time::Duration;

pub trait RetryPolicy: Send + Sync {
    /// Delay before retry number `attempt` (1-based), or None to give up
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Doubling delay, capped, for a bounded number of retries
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.retry_max_attempts,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Never retry
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_exactly_one_retry() {
        let policy = ExponentialBackoff::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ExponentialBackoff {
            max_retries: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        let delays: Vec<_> = (1..=7).map(|a| policy.next_delay(a)).collect();
        assert_eq!(delays[0], Some(Duration::from_millis(100)));
        assert_eq!(delays[1], Some(Duration::from_millis(200)));
        assert_eq!(delays[2], Some(Duration::from_millis(400)));
        assert_eq!(delays[3], Some(Duration::from_millis(800)));
        assert_eq!(delays[4], Some(Duration::from_millis(1000)));
        assert_eq!(delays[5], Some(Duration::from_millis(1000)));
        assert_eq!(delays[6], None);
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(NoRetry.next_delay(1), None);
    }
}
