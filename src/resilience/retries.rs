//! Retry policy.
//!
//! Every attempt outside [200, 300) is a failure, including informational and
//! redirect statuses. Failed attempts are followed by a fixed wait; there is
//! no jitter and no growth.

use std::time::Duration;

use axum::http::StatusCode;

use crate::config::RetryConfig;

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Attempt numbers, starting at 1.
    pub fn attempts(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.interval_ms))
    }
}

/// Whether an upstream status ends the retry loop.
pub fn is_success(status: StatusCode) -> bool {
    (200..300).contains(&status.as_u16())
}
